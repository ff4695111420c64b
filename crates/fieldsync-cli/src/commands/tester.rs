use fieldsync_core::tester::TestOperationKind;
use fieldsync_core::{OfflineService, SyncMode};

use crate::commands::common::print_json;
use crate::error::CliError;

pub async fn run_test_queue(service: &OfflineService, kind: TestOperationKind) -> Result<(), CliError> {
    let item = service.tester.test_queue_operation(kind).await?;
    print_json(&item)
}

pub async fn run_test_conflict(service: &OfflineService) -> Result<(), CliError> {
    let check = service.tester.test_conflict_detection().await?;
    if check.conflict.is_none() {
        eprintln!("No conflict detected for queued record {}.", check.item.id);
    }
    print_json(&check)
}

pub async fn run_test_inspect(service: &OfflineService) -> Result<(), CliError> {
    let inspection = service.tester.inspect_queue().await;
    print_json(&inspection)
}

pub async fn run_test_force_sync(service: &OfflineService, mode: SyncMode) -> Result<(), CliError> {
    let outcome = service.tester.force_sync_test(mode).await?;
    print_json(&outcome)
}

pub async fn run_test_reset(service: &OfflineService) -> Result<(), CliError> {
    let removed = service.tester.clear_all_offline_data().await?;
    if removed.is_empty() {
        println!("No offline keys found.");
    }
    for key in removed {
        println!("{key}");
    }
    Ok(())
}
