use anyhow::Result;
use dialoguer::{Confirm, MultiSelect, Select};

use s3ry_core::messages::{Catalog, Operation};
use s3ry_engine::{BucketInfo, ObjectInfo, UploadCandidate};

use crate::format::human_bytes;

fn object_row(obj: &ObjectInfo) -> String {
    format!(
        "{}  {:>10}  {}",
        obj.last_modified.format("%Y-%m-%d %H:%M:%S"),
        human_bytes(obj.size),
        obj.key
    )
}

/// Pick a bucket; `None` means quit (Esc/q).
pub fn select_bucket(catalog: &Catalog, buckets: &[BucketInfo]) -> Result<Option<usize>> {
    let items: Vec<&str> = buckets.iter().map(|b| b.name.as_str()).collect();
    let choice = Select::new()
        .with_prompt(catalog.bucket_prompt())
        .items(&items)
        .default(0)
        .interact_opt()?;
    Ok(choice)
}

/// Pick an operation; `None` means back to bucket selection / quit.
pub fn select_operation(catalog: &Catalog) -> Result<Option<Operation>> {
    let mut items: Vec<String> = Operation::ALL
        .iter()
        .map(|op| catalog.operation_label(*op).to_string())
        .collect();
    items.push(catalog.quit_label().to_string());

    let choice = Select::new()
        .with_prompt(catalog.operation_prompt())
        .items(&items)
        .default(0)
        .interact_opt()?;

    Ok(choice.and_then(|idx| Operation::ALL.get(idx).copied()))
}

/// Pick one object to download.
pub fn select_object(catalog: &Catalog, objects: &[ObjectInfo]) -> Result<Option<usize>> {
    let items: Vec<String> = objects.iter().map(object_row).collect();
    let choice = Select::new()
        .with_prompt(catalog.download_prompt())
        .items(&items)
        .default(0)
        .interact_opt()?;
    Ok(choice)
}

/// Pick any number of objects to delete.
pub fn select_objects_for_delete(
    catalog: &Catalog,
    objects: &[ObjectInfo],
) -> Result<Vec<usize>> {
    let items: Vec<String> = objects.iter().map(object_row).collect();
    let picked = MultiSelect::new()
        .with_prompt(catalog.delete_prompt())
        .items(&items)
        .interact_opt()?;
    Ok(picked.unwrap_or_default())
}

/// Pick any number of local files to upload.
pub fn select_upload_candidates(
    catalog: &Catalog,
    candidates: &[UploadCandidate],
) -> Result<Vec<usize>> {
    let items: Vec<String> = candidates
        .iter()
        .map(|c| format!("{:>10}  {}", human_bytes(c.size), c.key))
        .collect();
    let picked = MultiSelect::new()
        .with_prompt(catalog.upload_prompt())
        .items(&items)
        .interact_opt()?;
    Ok(picked.unwrap_or_default())
}

/// Ask before clobbering an existing local file.
pub fn confirm_overwrite(catalog: &Catalog, name: &str) -> Result<bool> {
    Ok(Confirm::new()
        .with_prompt(catalog.overwrite_prompt(name))
        .default(false)
        .interact_opt()?
        .unwrap_or(false))
}
