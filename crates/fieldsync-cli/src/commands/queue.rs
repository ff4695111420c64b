use fieldsync_core::models::EnqueueOptions;
use fieldsync_core::util::unix_millis_now;
use fieldsync_core::{OfflineService, Priority, QueueItemId, QueueOperation, SyncMode};

use crate::cli::OperationKind;
use crate::commands::common::{
    format_queue_item_lines, format_timestamp, parse_data_arg, print_json,
};
use crate::error::CliError;

pub struct EnqueueArgs<'a> {
    pub op: OperationKind,
    pub collection: &'a str,
    pub doc_id: &'a str,
    pub data: Option<&'a str>,
    pub priority: Priority,
    pub entity_type: &'a str,
}

pub fn build_operation(args: &EnqueueArgs<'_>) -> Result<QueueOperation, CliError> {
    let collection = args.collection.to_string();
    let doc_id = args.doc_id.to_string();
    match (args.op, args.data) {
        (OperationKind::Set, Some(raw)) => Ok(QueueOperation::Set {
            collection,
            doc_id,
            data: parse_data_arg(raw)?,
        }),
        (OperationKind::Update, Some(raw)) => Ok(QueueOperation::Update {
            collection,
            doc_id,
            data: parse_data_arg(raw)?,
        }),
        (OperationKind::Delete, None) => Ok(QueueOperation::Delete { collection, doc_id }),
        (OperationKind::Set, None) => Err(CliError::MissingData("set")),
        (OperationKind::Update, None) => Err(CliError::MissingData("update")),
        (OperationKind::Delete, Some(_)) => Err(CliError::UnexpectedData),
    }
}

pub async fn run_enqueue(service: &OfflineService, args: &EnqueueArgs<'_>) -> Result<(), CliError> {
    let operation = build_operation(args)?;
    let options = EnqueueOptions::with_priority(args.priority).entity_type(args.entity_type);
    let item = service.queue.enqueue(operation, options).await?;
    println!("{}", item.id);
    Ok(())
}

pub async fn run_status(service: &OfflineService, as_json: bool) -> Result<(), CliError> {
    let status = service.queue.get_sync_status().await;
    if as_json {
        return print_json(&status);
    }

    println!("State:    {}", status.state());
    println!("Pending:  {}", status.pending_count);
    println!("Failed:   {}", status.failed_count);
    match status.last_sync_at {
        Some(at) => println!("Last run: {}", format_timestamp(at)),
        None => println!("Last run: never"),
    }
    Ok(())
}

pub async fn run_queue(service: &OfflineService, as_json: bool) -> Result<(), CliError> {
    let items = service.queue.get_queued_items().await;
    if as_json {
        return print_json(&items);
    }

    if items.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }
    for line in format_queue_item_lines(&items, unix_millis_now()) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_sync(
    service: &OfflineService,
    mode: SyncMode,
    as_json: bool,
) -> Result<(), CliError> {
    let report = service.queue.sync_queue(mode).await?;
    if as_json {
        return print_json(&report);
    }

    if report.attempted == 0 && !service.queue.is_online().await {
        println!("Offline: nothing synced");
        return Ok(());
    }
    println!(
        "Synced {} ({} conflicts, {} failed, {} skipped)",
        report.synced, report.conflicts, report.failed, report.skipped
    );
    Ok(())
}

pub async fn run_clear_failed(service: &OfflineService) -> Result<(), CliError> {
    let removed = service.queue.clear_failed_items().await?;
    println!("Removed {removed} failed items");
    Ok(())
}

pub async fn run_remove(service: &OfflineService, id: &str) -> Result<(), CliError> {
    let item_id = id
        .trim()
        .parse::<QueueItemId>()
        .map_err(|_| CliError::InvalidItemId(id.to_string()))?;
    if !service.queue.remove_item(&item_id).await? {
        return Err(CliError::ItemNotFound(id.to_string()));
    }
    println!("{item_id}");
    Ok(())
}
