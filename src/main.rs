use backsum::config::Config;
use backsum::mailbox::Pop3Session;
use backsum::pipeline::SummaryPipeline;
use backsum::sender::{NotificationSender, RetryPolicy, SmtpSender};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Log to screen and to `backsum.log` next to the binary's working
/// directory, so scheduled runs leave a trail.
fn init_logging() -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::never(".", "backsum.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    guard
}

fn main() -> anyhow::Result<()> {
    let _log_guard = init_logging();

    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    info!("Program started");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Could not load configuration");
            return Err(err.into());
        }
    };

    let session = match Pop3Session::connect(
        &config.mail_server,
        config.mailbox_port,
        &config.mailbox_user,
        &config.mailbox_password,
    ) {
        Ok(session) => session,
        Err(err) => {
            error!(error = %err, server = %config.mail_server, "Could not open mailbox session");
            return Err(err.into());
        }
    };

    let sender = NotificationSender::new(SmtpSender::new(&config)?, RetryPolicy::default());

    match SummaryPipeline::new(session, sender).run() {
        Ok(outcome) => {
            info!(outcome = ?outcome, "Run complete");
            Ok(())
        }
        Err(err) => {
            error!(error = %err, "Run failed");
            Err(err.into())
        }
    }
}
