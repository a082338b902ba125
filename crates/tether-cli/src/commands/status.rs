use crate::commands::common::{format_status_lines, Context, Session, StatusReport};
use crate::error::CliError;

pub async fn run_status(as_json: bool, context: &Context) -> Result<(), CliError> {
    let session = Session::open_local(context).await?;
    let status = session.engine.get_sync_status();
    session.close().await;

    if as_json {
        let report = StatusReport {
            state: status.state(),
            status: &status,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for line in format_status_lines(&status) {
        println!("{line}");
    }
    Ok(())
}
