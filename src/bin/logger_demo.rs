use topcat::logger::*;

fn main() -> anyhow::Result<()> {
    let logger = Logger::new_bootstrap();
    trace!("bootstrap trace log");
    debug!("bootstrap debug log");
    info!("bootstrap info log");

    let config = LogConfig {
        filter: "topcat=trace,warn".to_string(),
    };
    logger.reload_from_config(&config)?;
    trace!(target: "topcat", "client trace log");
    debug!(target: "topcat", "client debug log");
    info!("dependency info log (filtered)");
    warn!("dependency warn log");

    Ok(())
}
