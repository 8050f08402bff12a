//! Run lease stored in cells of the master workbook.
//!
//! Row 2 of the lease sheet holds `flag | holder | acquired_at`. The version
//! token is a SHA-256 fingerprint of those cells, so a conditional write is a
//! read-compare-write and two processes can still interleave between the
//! compare and the write.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tabsync_core::{
    DocumentId, Error as CoreError, LeaseRecord, LeaseStore, Result as CoreResult, StoredLease,
    WritePrecondition, WriteResult,
};

use crate::job::parse_flag;
use crate::provider::{ProviderError, ProviderErrorKind, SpreadsheetProvider};
use crate::retry::{RetryPolicy, with_retry};

/// Header row of the lease sheet.
pub const LEASE_HEADER: [&str; 3] = ["Locked", "Holder", "Acquired At"];

const LEASE_ROW: usize = 2;

/// [`LeaseStore`] over three cells of a worksheet.
pub struct SheetLeaseStore {
    provider: Arc<dyn SpreadsheetProvider>,
    document: DocumentId,
    sheet: String,
    retry: RetryPolicy,
}

impl SheetLeaseStore {
    /// Creates a lease store on `sheet` of `document`.
    #[must_use]
    pub fn new(
        provider: Arc<dyn SpreadsheetProvider>,
        document: DocumentId,
        sheet: impl Into<String>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            document,
            sheet: sheet.into(),
            retry,
        }
    }

    async fn read_cells(&self) -> CoreResult<Option<Vec<String>>> {
        let provider = self.provider.as_ref();
        match with_retry(&self.retry, "read_row", || {
            provider.read_row(&self.document, &self.sheet, LEASE_ROW)
        })
        .await
        {
            Ok(cells) if cells.iter().all(|c| c.trim().is_empty()) => Ok(None),
            Ok(cells) => Ok(Some(cells)),
            Err(e) if e.kind == ProviderErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error("read lease", e)),
        }
    }

    async fn ensure_sheet(&self) -> CoreResult<()> {
        let provider = self.provider.as_ref();
        let titles = with_retry(&self.retry, "worksheet_titles", || {
            provider.worksheet_titles(&self.document)
        })
        .await
        .map_err(|e| storage_error("list sheets", e))?;
        if titles.contains(&self.sheet) {
            return Ok(());
        }
        with_retry(&self.retry, "add_worksheet", || {
            provider.add_worksheet(&self.document, &self.sheet, 10, LEASE_HEADER.len())
        })
        .await
        .map_err(|e| storage_error("create lease sheet", e))?;
        let header: Vec<String> = LEASE_HEADER.iter().map(ToString::to_string).collect();
        with_retry(&self.retry, "update_row", || {
            provider.update_row(&self.document, &self.sheet, 1, 0, &header)
        })
        .await
        .map_err(|e| storage_error("write lease header", e))
    }
}

fn storage_error(context: &str, err: ProviderError) -> CoreError {
    CoreError::storage_with_source(format!("{context}: {}", err.message), err)
}

fn fingerprint(cells: &[String]) -> String {
    let mut hasher = Sha256::new();
    for cell in cells.iter().take(LEASE_HEADER.len()) {
        hasher.update(cell.trim().as_bytes());
        hasher.update([0x1f]);
    }
    hex::encode(hasher.finalize())
}

fn to_cells(record: &LeaseRecord) -> Vec<String> {
    vec![
        if record.locked { "TRUE" } else { "FALSE" }.to_string(),
        record.holder_id.clone(),
        record
            .acquired_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_default(),
    ]
}

fn from_cells(cells: &[String]) -> LeaseRecord {
    let cell = |i: usize| cells.get(i).map_or("", |c| c.trim());
    LeaseRecord {
        locked: parse_flag(cell(0)),
        holder_id: cell(1).to_string(),
        acquired_at: DateTime::parse_from_rfc3339(cell(2))
            .ok()
            .map(|at| at.with_timezone(&Utc)),
    }
}

#[async_trait]
impl LeaseStore for SheetLeaseStore {
    async fn read(&self) -> CoreResult<Option<StoredLease>> {
        Ok(self.read_cells().await?.map(|cells| StoredLease {
            record: from_cells(&cells),
            version: fingerprint(&cells),
        }))
    }

    async fn write(
        &self,
        record: &LeaseRecord,
        precondition: WritePrecondition,
    ) -> CoreResult<WriteResult> {
        let current = self.read_cells().await?;
        let current_version = current.as_deref().map(fingerprint);
        let allowed = match &precondition {
            WritePrecondition::None => true,
            WritePrecondition::DoesNotExist => current_version.is_none(),
            WritePrecondition::MatchesVersion(v) => current_version.as_ref() == Some(v),
        };
        if !allowed {
            return Ok(WriteResult::PreconditionFailed {
                current_version: current_version.unwrap_or_default(),
            });
        }

        self.ensure_sheet().await?;
        let cells = to_cells(record);
        let provider = self.provider.as_ref();
        with_retry(&self.retry, "update_row", || {
            provider.update_row(&self.document, &self.sheet, LEASE_ROW, 0, &cells)
        })
        .await
        .map_err(|e| storage_error("write lease", e))?;
        Ok(WriteResult::Success {
            version: fingerprint(&cells),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MemoryProvider;
    use std::time::Duration;
    use tabsync_core::{HolderId, LeaseManager};

    fn doc() -> DocumentId {
        DocumentId::new("master").expect("doc id")
    }

    fn leases(provider: &MemoryProvider) -> LeaseManager<SheetLeaseStore> {
        provider.insert_sheet(&doc(), "jobs", Vec::new());
        let store = SheetLeaseStore::new(
            Arc::new(provider.clone()),
            doc(),
            "sys_lock",
            RetryPolicy::immediate(2),
        );
        LeaseManager::new(Arc::new(store), Duration::from_secs(60))
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).expect("timestamp")
    }

    #[tokio::test]
    async fn acquire_writes_cells_and_release_clears_flag() {
        let provider = MemoryProvider::new();
        let leases = leases(&provider);

        let guard = leases
            .acquire_at(&HolderId::new("bot-a"), at(0))
            .await
            .expect("acquire");
        let rows = provider.sheet_rows(&doc(), "sys_lock").expect("lease sheet");
        assert_eq!(rows[0][0], "Locked");
        assert_eq!(rows[1][0], "TRUE");
        assert_eq!(rows[1][1], "bot-a");

        guard.release().await.expect("release");
        let rows = provider.sheet_rows(&doc(), "sys_lock").expect("lease sheet");
        assert_eq!(rows[1][0], "FALSE");
    }

    #[tokio::test]
    async fn fresh_sheet_lease_blocks_other_holder_until_ttl() {
        let provider = MemoryProvider::new();
        let leases = leases(&provider);
        let _held = leases
            .acquire_at(&HolderId::new("bot-a"), at(0))
            .await
            .expect("acquire");

        let err = leases
            .acquire_at(&HolderId::new("bot-b"), at(30))
            .await
            .expect_err("busy");
        assert!(err.is_lease_held());

        leases
            .acquire_at(&HolderId::new("bot-b"), at(61))
            .await
            .expect("stale lease reclaimed");
    }

    #[tokio::test]
    async fn hand_edited_lease_without_timestamp_is_reclaimable() {
        let provider = MemoryProvider::new();
        let leases = leases(&provider);
        provider.insert_sheet(
            &doc(),
            "sys_lock",
            vec![
                LEASE_HEADER.iter().map(ToString::to_string).collect(),
                vec!["TRUE".into(), "ghost".into(), "yesterday".into()],
            ],
        );
        leases
            .acquire_at(&HolderId::new("bot-a"), at(0))
            .await
            .expect("acquire over unparsable timestamp");
    }
}
