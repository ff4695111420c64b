use fieldsync_core::remote::SetOptions;
use fieldsync_core::OfflineService;

use crate::commands::common::{parse_data_arg, print_json};
use crate::error::CliError;

pub async fn run_remote_get(
    service: &OfflineService,
    collection: &str,
    doc_id: &str,
) -> Result<(), CliError> {
    let document = service
        .remote
        .get(collection, doc_id)
        .await?
        .ok_or_else(|| CliError::DocumentNotFound(format!("{collection}/{doc_id}")))?;
    print_json(&document)
}

pub async fn run_remote_put(
    service: &OfflineService,
    collection: &str,
    doc_id: &str,
    raw: &str,
    merge: bool,
) -> Result<(), CliError> {
    let data = parse_data_arg(raw)?;
    let options = if merge {
        SetOptions::MERGE
    } else {
        SetOptions::REPLACE
    };
    let written = service.remote.set(collection, doc_id, data, options).await?;
    print_json(&written)
}

pub async fn run_remote_list(
    service: &OfflineService,
    collection: &str,
    limit: usize,
) -> Result<(), CliError> {
    let documents = service.remote.list(collection, limit).await?;
    print_json(&documents)
}

pub async fn run_remote_delete(
    service: &OfflineService,
    collection: &str,
    doc_id: &str,
) -> Result<(), CliError> {
    service.remote.delete(collection, doc_id).await?;
    println!("{collection}/{doc_id}");
    Ok(())
}
