use biolat::{config::Cli, metrics::MetricsState, Aggregator, KernelProbe, Shutdown};
use clap::Parser;
use log::{debug, info};
use tokio::signal::unix::{signal, SignalKind};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();
    env_logger::init();

    raise_memlock_rlimit();

    let mut aggregator = Aggregator::new(cli.interval, cli.display_buckets, cli.format);
    if let Some(addr) = cli.metrics_addr {
        let metrics = MetricsState::new()?;
        metrics.serve(addr)?;
        aggregator = aggregator.with_metrics(metrics);
    }

    let mut probe = KernelProbe::load_and_attach(&cli.object)?;
    println!(
        "BPF program loaded and attached. Printing histogram every {} seconds.",
        cli.interval.as_secs()
    );

    let shutdown = Shutdown::new();
    spawn_signal_listener(shutdown.clone())?;

    let mut stdout = std::io::stdout().lock();
    let reports = aggregator.run(&mut probe, &mut stdout, &shutdown).await;

    probe.detach();
    info!("printed {} reports", reports?);

    Ok(())
}

/// SIGINT or SIGTERM asks the reporting loop to stop after the current cycle.
fn spawn_signal_listener(shutdown: Shutdown) -> Result<(), anyhow::Error> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
        info!("shutdown requested");
        shutdown.trigger();
    });
    Ok(())
}

// Kernels before 5.11 charge BPF maps against RLIMIT_MEMLOCK.
fn raise_memlock_rlimit() {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        debug!("remove limit on locked memory failed, ret is: {}", ret);
    }
}
