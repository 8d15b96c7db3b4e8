use anyhow::Error;
use clap::{builder::BoolishValueParser, ArgAction, Parser};
use jcds::{
    init_logging,
    jamf::{client, Client},
    mirror,
    schedule::Schedule,
};

mod test_runner;

/// Mirror the packages in a Jamf Pro distribution point into a local directory.
#[derive(Clone, Parser)]
struct Options {
    /// When to sync, as a crontab expression in local time.
    #[clap(long, env = "SYNC_SCHEDULE", default_value = "0 0 * * *")]
    schedule: Schedule,

    /// Sync once and exit, instead of syncing on a schedule.
    #[clap(
        long,
        env = "SYNC_NOW",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    now: bool,

    #[clap(flatten)]
    jamf: client::Options,

    #[clap(flatten)]
    mirror: mirror::Options,
}

impl Options {
    async fn run(&self) -> Result<(), Error> {
        let client = Client::new(&self.jamf)?;
        if self.now {
            let report = mirror::sync(&client, &self.mirror).await?;
            if report.failed > 0 {
                return Err(Error::msg(format!(
                    "{} files could not be synced",
                    report.failed
                )));
            }
            return Ok(());
        }

        tracing::info!(
            "syncing {} on schedule '{}'",
            self.mirror.dir.display(),
            self.schedule
        );
        let client = &client;
        let opt = &self.mirror;
        self.schedule
            .run(move || async move { mirror::sync(client, opt).await.map(|_| ()) })
            .await
    }
}

#[async_std::main]
async fn main() -> Result<(), Error> {
    init_logging();
    Options::parse().run().await
}
