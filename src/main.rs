mod config;
mod interfaces;
mod logging;
mod monitoring;
mod notify;
mod portal;
mod probe;

use monitoring::Notification;

/// The real network, portal and mail server.
struct Live {
    http: reqwest::Client,
    check_url: String,
    portal: portal::Portal,
    mailer: notify::Mailer,
}

impl Live {
    fn from_config(config: &config::Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            check_url: config.network.check_url.clone(),
            portal: portal::Portal::from_config(&config.network, &config.credentials),
            mailer: notify::Mailer::from_config(&config.email),
        }
    }
}

impl monitoring::Backend for Live {
    async fn check_connectivity(&self) -> bool {
        probe::check_connectivity(&self.http, &self.check_url, probe::DEFAULT_TIMEOUT).await
    }

    async fn login(&self) -> portal::LoginOutcome {
        tracing::info!("Looking up the local campus IP address");
        let ip = match interfaces::interface_dump(interfaces::Detail::Basic).await {
            Some(dump) => {
                tracing::debug!("Interface dump:\n{}", dump);
                interfaces::extract_campus_ip(&dump)
            }
            None => None,
        };
        if ip.is_none() {
            tracing::error!(
                "No {}x.x IPv4 address found on any interface",
                interfaces::CAMPUS_PREFIX
            );
        }

        self.portal.login(ip.as_deref()).await
    }

    async fn notify(&self, notification: &Notification) -> bool {
        match notification {
            Notification::Connected => {
                self.mailer
                    .notify(
                        "校园网连接通知: 连接成功",
                        "设备当前已连接到校园网并通过互联网检查。",
                        None,
                    )
                    .await
            }
            Notification::Reconnected(details) => {
                let body = format!(
                    "检测到校园网连接中断，已于 {} 自动重新连接成功。",
                    details.reconnected_at.format("%Y-%m-%d %H:%M:%S")
                );
                self.mailer
                    .notify("校园网重连通知: 自动重连成功", &body, Some(details))
                    .await
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let base_dir = config::base_dir();
    let config_path = base_dir.join(config::CONFIG_FILE_NAME);

    let config = match config::Config::load(&config_path) {
        Ok(config) => config,
        Err(why) => {
            eprintln!("cannot load config file {}: {}", config_path.display(), why);
            std::process::exit(1);
        }
    };

    let log_dir = base_dir.join("logs");
    let _log_guard = match logging::init(config.dev.level_filter(), &log_dir) {
        Ok(guard) => guard,
        Err(why) => {
            eprintln!("cannot set up logging in {}: {}", log_dir.display(), why);
            std::process::exit(1);
        }
    };

    tracing::info!("==================================================");
    tracing::info!("====  Campus network keepalive watchdog  ====");
    tracing::info!("==================================================");
    tracing::info!("Configuration loaded from {}", config_path.display());
    tracing::info!(
        "Account {}, notifications to {} via {}:{}",
        config.credentials.username,
        config.email.receiver_email,
        config.email.smtp_server,
        config.email.smtp_port
    );
    tracing::info!(
        "Check interval {} min; high-frequency retries every {} s for {} min",
        config.schedule.interval,
        config.schedule.high_frequency_interval,
        config.schedule.high_frequency_duration
    );
    tracing::info!("Logs are written to {}", log_dir.join(logging::LOG_FILE_NAME).display());

    let mut monitoring = monitoring::Monitoring::new(Live::from_config(&config), config.schedule);
    monitoring.run().await;
}
