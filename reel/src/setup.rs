#[cfg(feature = "processing")]
use anyhow::Context;
use anyhow::Result;
use reel_config::Config;
use reel_statsd::MetricsClientConfig;

/// Sets up the tracing subscriber and error reporting.
pub fn init_logging(config: &Config) {
    reel_log::init(config.logging(), config.sentry());
}

pub fn check_config(config: &Config) -> Result<()> {
    if config.validate().is_err() {
        anyhow::bail!(
            "no token secret is configured. \
             Generate one with \"reel token generate-secret\" and set `auth.token_secret`.",
        );
    }

    if config.projects().is_empty() {
        reel_log::warn!("no projects are configured, all start requests will be rejected");
    }

    #[cfg(feature = "processing")]
    if config.processing_enabled() {
        for topic in reel_kafka::KafkaTopic::iter() {
            let _ = config
                .kafka_config(*topic)
                .with_context(|| format!("invalid kafka configuration for topic '{topic:?}'"))?;
        }
    }

    Ok(())
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    if config.path().as_os_str().is_empty() {
        reel_log::info!("launching reel without config folder");
    } else {
        reel_log::info!(
            "launching reel from config folder {}",
            config.path().display()
        );
    }
    reel_log::info!("  shard id: {}", config.shard_id());
    reel_log::info!("  projects: {}", config.projects().len());
    reel_log::info!("  processing: {}", config.processing_enabled());
    reel_log::info!("  log level: {}", config.logging().level);
}

/// Initialize the metric system.
pub fn init_metrics(config: &Config) -> Result<()> {
    let addrs = config.statsd_addrs()?;
    if addrs.is_empty() {
        return Ok(());
    }

    let mut default_tags = config.metrics_default_tags().clone();
    if let Some(hostname_tag) = config.metrics_hostname_tag()
        && let Some(hostname) = hostname::get().ok().and_then(|s| s.into_string().ok())
    {
        default_tags.insert(hostname_tag.to_owned(), hostname);
    }

    reel_statsd::init(MetricsClientConfig {
        prefix: config.metrics_prefix(),
        host: &addrs[..],
        default_tags,
        default_sample_rate: config.metrics_sample_rate().into(),
        buffering: config.metrics_buffering(),
    })?;

    Ok(())
}
