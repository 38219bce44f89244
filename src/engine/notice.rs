use std::sync::MutexGuard;

use tokio::time::Instant;
use tracing::info;

use crate::limits::MAX_NOTICE_LEN;
use crate::model::*;

use super::conflict::now_ms;
use super::{Engine, EngineError};

impl Engine {
    pub(super) fn notice_slot(&self) -> MutexGuard<'_, Option<WeeklyNotice>> {
        // The slot holds plain data, so a poisoned lock is still consistent.
        self.weekly_notice.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn weekly_notice(&self) -> Option<WeeklyNotice> {
        self.notice_slot().clone()
    }

    /// Create or replace the weekly notice. Empty content is allowed and
    /// clears what readers see without removing the record.
    pub async fn update_weekly_notice(
        &self,
        content: String,
        updated_by: UserId,
        deadline: Instant,
    ) -> Result<WeeklyNotice, EngineError> {
        if content.len() > MAX_NOTICE_LEN {
            return Err(EngineError::LimitExceeded("notice too long"));
        }
        // Same lock as the catalog, so WAL order and memory order agree.
        let _catalog = self.lock_catalog(deadline).await?;

        let notice = WeeklyNotice {
            content,
            updated_by,
            updated_at: now_ms(),
        };
        let event = Event::WeeklyNoticeUpdated {
            content: notice.content.clone(),
            updated_by: notice.updated_by.clone(),
            updated_at: notice.updated_at,
        };
        self.persist_and_apply(&mut [], &event).await?;
        info!("weekly notice updated by {}", notice.updated_by);
        Ok(notice)
    }
}
