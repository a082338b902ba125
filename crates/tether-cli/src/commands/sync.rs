use crate::commands::common::{format_status_lines, Context, Session};
use crate::error::CliError;

pub async fn run_sync(context: &Context) -> Result<(), CliError> {
    let session = Session::open_connected(context).await?;
    if !session.is_online() {
        let pending = session.engine.get_sync_status().pending_actions;
        session.close().await;
        println!("Remote unreachable; {pending} action(s) stay queued");
        return Ok(());
    }

    let result = session.engine.force_sync().await;
    session.close().await;

    let status = result?;
    println!("Sync completed");
    for line in format_status_lines(&status) {
        println!("{line}");
    }
    Ok(())
}

/// Keep the engine running with its network monitor and periodic timer,
/// printing every status change until Ctrl-C.
pub async fn run_watch(context: &Context) -> Result<(), CliError> {
    let session = Session::open_connected(context).await?;
    let mut updates = session.engine.subscribe();
    println!("Watching sync status (Ctrl-C to stop)");

    let result = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => break signal.map_err(CliError::from),
            update = updates.recv() => {
                let Some(status) = update else {
                    break Ok(());
                };
                println!("---");
                for line in format_status_lines(&status) {
                    println!("{line}");
                }
            }
        }
    };

    if session.engine.cancel_sync() {
        tracing::info!("Interrupted a running sync pass");
    }
    session.close().await;
    result
}
