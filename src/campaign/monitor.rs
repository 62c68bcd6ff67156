//! Campaign monitor: totals over the session's campaign log and CSV export.

use super::{CampaignLogEntry, CampaignStatus, Channel};
use crate::error::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CampaignStats {
    pub campaigns: usize,
    pub successful_campaigns: usize,
    pub targets: usize,
    pub sent: usize,
    pub failed: usize,
    /// Sent over targets, in percent.
    pub success_rate: f64,
    pub per_channel: BTreeMap<Channel, usize>,
}

impl CampaignStats {
    pub fn from_log(entries: &[CampaignLogEntry]) -> Self {
        let mut stats = CampaignStats {
            campaigns: entries.len(),
            ..Default::default()
        };
        for entry in entries {
            stats.targets += entry.target_count;
            stats.sent += entry.sent;
            stats.failed += entry.failed;
            if entry.status == CampaignStatus::Success {
                stats.successful_campaigns += 1;
            }
            *stats.per_channel.entry(entry.channel).or_insert(0) += 1;
        }
        if stats.targets > 0 {
            stats.success_rate = stats.sent as f64 * 100.0 / stats.targets as f64;
        }
        stats
    }
}

pub fn to_csv_string(entries: &[CampaignLogEntry]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for entry in entries {
        writer.serialize(entry)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| crate::error::AssistantError::Io(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

pub fn export_csv(entries: &[CampaignLogEntry], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for entry in entries {
        writer.serialize(entry)?;
    }
    writer.flush()?;
    info!("Exported {} campaign log entries to {}", entries.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::CampaignOutcome;

    fn entry(channel: Channel, sent: usize, failed: usize) -> CampaignLogEntry {
        let outcome = CampaignOutcome {
            success: true,
            sent,
            failed,
            ..Default::default()
        };
        CampaignLogEntry::new(channel, &outcome, "SELECT * FROM t")
    }

    #[test]
    fn test_stats_totals() {
        let log = vec![entry(Channel::Sms, 3, 1), entry(Channel::Email, 1, 0), entry(Channel::Sms, 0, 0)];
        let stats = CampaignStats::from_log(&log);
        assert_eq!(stats.campaigns, 3);
        assert_eq!(stats.sent, 4);
        assert_eq!(stats.targets, 5);
        assert!((stats.success_rate - 80.0).abs() < 1e-9);
        assert_eq!(stats.per_channel[&Channel::Sms], 2);
    }

    #[test]
    fn test_empty_log_has_zero_rate() {
        assert_eq!(CampaignStats::from_log(&[]).success_rate, 0.0);
    }

    #[test]
    fn test_csv_has_header_and_rows() {
        let csv = to_csv_string(&[entry(Channel::Call, 2, 1)]).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "timestamp,channel,target_count,sent,failed,status,query"
        );
        assert!(lines.next().unwrap().contains(",Call,3,2,1,Success,SELECT * FROM t"));
    }
}
