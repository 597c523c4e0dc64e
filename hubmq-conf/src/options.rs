use structopt::StructOpt;

#[derive(StructOpt, Debug, Clone, Default)]
#[structopt(name = "hubmqd", about = "Embedded MQTT 3.1.1 broker for the installation-control hub")]
pub struct Options {
    /// Config filename
    #[structopt(name = "config", short = "f", long)]
    pub cfg_name: Option<String>,

    /// Listening port, overrides `listener.addr`
    #[structopt(name = "port", short = "p", long)]
    pub port: Option<u16>,
}
