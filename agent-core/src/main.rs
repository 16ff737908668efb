#[macro_use]
extern crate slog_scope;

use std::error::Error;

use docopt::Docopt;
use serde::Deserialize;

use agent_core::{logging, server, AgentCore};
use agent_settings::Settings;

const USAGE: &str = "
Usage: agent [options]

Options:
    -h, --help               Show this message.
    --config=CONFIGFILE      Agent configuration file path.
";

#[derive(Debug, Deserialize)]
struct Args {
    flag_config: Option<String>,
}

#[actix_web::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args: Args = Docopt::new(USAGE)
        .and_then(|d| d.deserialize())
        .unwrap_or_else(|e| e.exit());
    let settings = Settings::with_env_and_config_file(args.flag_config.as_deref())?;
    logging::init_logging(!settings.human_logs).expect("Logging failed to initialize");
    debug!("Starting up...");

    let host = settings.server_host.clone();
    let port = settings.server_port;

    let core = AgentCore::new(settings)?;
    core.start();

    let sna_service = core.sna_service.clone();
    let result = server::run(&host, port, sna_service).await;

    core.stop();
    info!("Server closing");
    logging::reset_logging();

    result?;
    Ok(())
}
