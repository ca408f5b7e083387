//! Loading and attaching the kernel handlers.

use std::path::Path;

use aya::{
    maps::{Array, MapData, MapError, PerCpuArray},
    programs::{tp_btf::BtfTracePointLinkId, BtfTracePoint},
    Btf, Ebpf,
};
use biolat_common::{COMPLETE_PROGRAM, DROPPED_MAP, EPOCH_MAP, LATENCIES_MAP, SUBMIT_PROGRAM};
use log::{debug, info, warn};

use crate::{
    aggregator::HistogramSource,
    epoch::{CounterBank, EpochHistogram},
    error::SetupError,
};

/// The `LATENCIES` and `EPOCH` maps.
pub struct KernelBank {
    latencies: Array<MapData, u64>,
    epoch: Array<MapData, u32>,
}

impl CounterBank for KernelBank {
    type Error = MapError;

    fn read(&self, index: u32) -> Result<u64, MapError> {
        self.latencies.get(&index, 0)
    }

    fn write(&mut self, index: u32, value: u64) -> Result<(), MapError> {
        self.latencies.set(index, value, 0)
    }

    fn set_epoch(&mut self, half: u32) -> Result<(), MapError> {
        self.epoch.set(0, half, 0)
    }
}

/// The loaded eBPF object with both block tracepoints attached.
///
/// Dropping it detaches the handlers and frees the maps; [`detach`]
/// does the same but reports what it is doing.
///
/// [`detach`]: KernelProbe::detach
pub struct KernelProbe {
    bpf: Ebpf,
    links: Vec<(&'static str, BtfTracePointLinkId)>,
    histogram: EpochHistogram<KernelBank>,
    dropped: PerCpuArray<MapData, u64>,
    dropped_seen: u64,
}

impl KernelProbe {
    pub fn load_and_attach(path: &Path) -> Result<Self, SetupError> {
        info!("loading eBPF object {}", path.display());
        let mut bpf = Ebpf::load_file(path).map_err(|source| SetupError::Load {
            path: path.to_owned(),
            source,
        })?;

        let btf = Btf::from_sys_fs()?;
        let mut links = Vec::with_capacity(2);
        for name in [SUBMIT_PROGRAM, COMPLETE_PROGRAM] {
            info!("attaching program {name}");
            let program: &mut BtfTracePoint = bpf
                .program_mut(name)
                .ok_or(SetupError::MissingProgram(name))?
                .try_into()
                .map_err(|source| SetupError::Attach { name, source })?;
            program
                .load(name, &btf)
                .map_err(|source| SetupError::Attach { name, source })?;
            let link = program
                .attach()
                .map_err(|source| SetupError::Attach { name, source })?;
            links.push((name, link));
        }

        let bank = KernelBank {
            latencies: take_map(&mut bpf, LATENCIES_MAP)?,
            epoch: take_map(&mut bpf, EPOCH_MAP)?,
        };
        let dropped = take_map(&mut bpf, DROPPED_MAP)?;

        Ok(Self {
            bpf,
            links,
            histogram: EpochHistogram::new(bank),
            dropped,
            dropped_seen: 0,
        })
    }

    /// Detaches both handlers. Call only once the reporter has stopped.
    pub fn detach(mut self) {
        for (name, link) in self.links.drain(..) {
            let Some(program) = self.bpf.program_mut(name) else {
                continue;
            };
            let result = <&mut BtfTracePoint>::try_from(program).and_then(|p| p.detach(link));
            match result {
                Ok(()) => debug!("detached program {name}"),
                Err(e) => warn!("failed to detach program {name}: {e}"),
            }
        }
        info!("handlers detached");
    }
}

impl HistogramSource for KernelProbe {
    type Error = MapError;

    fn begin_interval(&mut self) -> Result<(), MapError> {
        self.histogram.begin_interval()
    }

    fn drain_bucket(&mut self, slot: u32) -> Result<u64, MapError> {
        self.histogram.drain_bucket(slot)
    }

    /// The kernel counter only grows; report the difference since last call.
    fn take_dropped(&mut self) -> u64 {
        match self.dropped.get(&0, 0) {
            Ok(per_cpu) => {
                let total: u64 = per_cpu.iter().sum();
                let dropped = total.wrapping_sub(self.dropped_seen);
                self.dropped_seen = total;
                dropped
            }
            Err(e) => {
                debug!("drop counter unreadable: {e}");
                0
            }
        }
    }
}

fn take_map<T>(bpf: &mut Ebpf, name: &'static str) -> Result<T, SetupError>
where
    T: TryFrom<aya::maps::Map, Error = MapError>,
{
    let map = bpf.take_map(name).ok_or(SetupError::MissingMap(name))?;
    T::try_from(map).map_err(|source| SetupError::Map { name, source })
}
