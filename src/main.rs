use clap::Parser;

use handmark::Opts;
use handmark::cli::SubCommandExtend;
use handmark::config::SubCommand;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let opts = Opts::parse();

    match &opts.subcmd {
        SubCommand::Extract(config) => config.run(&opts).await,
        SubCommand::Show(config) => config.run(&opts).await,
    }
}
