#![deny(unsafe_code)]

use std::process;
use std::time::Duration;

use structopt::StructOpt;

use hubmq::conf::{Options, Settings};
use hubmq::context::ServerContext;
use hubmq::logger::{config_logger, logger_init};
use hubmq::server::MqttServer;
use hubmq::{keepalive, Result};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("hubmqd failed to start: {e:?}");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    //init config
    let settings = Settings::init(Options::from_args())?;

    //init log
    logger_init(config_logger(&settings.log)?, settings.log.level)?;
    Settings::logs()?;

    let scx = ServerContext::new(settings.clone()).build()?;

    //keepalive supervisor
    let supervisor = keepalive::start(scx.router.clone(), settings.broker.sweep_interval);

    let listener = settings.listener.builder().bind()?;
    let server = MqttServer::new(scx.clone(), listener);

    tokio::select! {
        res = server.run() => {
            if let Err(e) = res {
                log::error!("listen mqtt failed: {e}");
            }
        }
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                log::error!("signal ctrl c: {e}");
            }
            log::info!("shutting down, {} clients connected", scx.router.client_count());
        }
    }

    supervisor.abort();
    log::info!("final stats: {:?}", scx.stats());
    //let the async log drain flush
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}
