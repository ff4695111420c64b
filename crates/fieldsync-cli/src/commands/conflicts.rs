use fieldsync_core::models::ResolutionStrategy;
use fieldsync_core::OfflineService;

use crate::commands::common::{format_conflict_lines, format_history_lines, print_json};
use crate::error::CliError;

pub async fn run_conflicts_list(service: &OfflineService, as_json: bool) -> Result<(), CliError> {
    let conflicts = service.resolver.get_unresolved_conflicts().await;
    if as_json {
        return print_json(&conflicts);
    }

    if conflicts.is_empty() {
        println!("No conflicts awaiting resolution.");
        return Ok(());
    }
    for line in format_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_conflicts_history(
    service: &OfflineService,
    limit: usize,
    as_json: bool,
) -> Result<(), CliError> {
    let history = service.resolver.get_resolution_history().await;
    let recent = &history[history.len().saturating_sub(limit)..];
    if as_json {
        return print_json(&recent);
    }

    if recent.is_empty() {
        println!("No resolved conflicts recorded.");
        return Ok(());
    }
    for line in format_history_lines(recent).into_iter().rev() {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_conflicts_resolve(
    service: &OfflineService,
    id: &str,
    strategy: Option<ResolutionStrategy>,
    transactional: bool,
) -> Result<(), CliError> {
    let written = if transactional {
        let conflict = service
            .resolver
            .get_conflict(id)
            .await
            .ok_or_else(|| fieldsync_core::Error::NotFound(format!("conflict {id}")))?;
        service.resolver.resolve_with_transaction(&conflict).await?
    } else {
        service.resolver.resolve_pending(id, strategy).await?
    };
    print_json(&written)
}

pub async fn run_conflicts_clear(service: &OfflineService) -> Result<(), CliError> {
    let count = service.resolver.get_unresolved_conflicts().await.len();
    service.resolver.clear_pending_conflicts().await?;
    println!("Dropped {count} pending conflicts");
    Ok(())
}
