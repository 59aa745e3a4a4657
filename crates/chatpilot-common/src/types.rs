//! Common types for ChatPilot

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Operating-system process id of a logged-in chat client
pub type Pid = u32;

/// Unique identifier for campaigns
pub type CampaignId = Uuid;

/// Unique identifier for delayed send directives
pub type DirectiveId = Uuid;

/// Marker contained in every group (chat room) id
pub const GROUP_ID_MARKER: &str = "@chatroom";

/// Returns true when the id addresses a group rather than a single contact
pub fn is_group_id(id: &str) -> bool {
    id.contains(GROUP_ID_MARKER)
}

/// A logged-in account discovered by the automation facade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub pid: Pid,
    pub wxid: String,
    pub nickname: String,
    #[serde(default)]
    pub phone: String,
}

/// Identity of the account that received an inbound message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountIdentity {
    pub pid: Pid,
    pub wxid: String,
    pub nickname: String,
}

impl From<&AccountInfo> for AccountIdentity {
    fn from(account: &AccountInfo) -> Self {
        Self {
            pid: account.pid,
            wxid: account.wxid.clone(),
            nickname: account.nickname.clone(),
        }
    }
}

/// A contact or group as enumerated from the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub wxid: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub remarks: String,
}

impl Contact {
    /// Name to show for this contact: the remark when set, otherwise the nickname
    pub fn display_name(&self) -> &str {
        if !self.remarks.trim().is_empty() {
            &self.remarks
        } else if !self.nickname.is_empty() {
            &self.nickname
        } else {
            &self.wxid
        }
    }
}

/// Everything `fetch_contacts` returns for one account
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactDirectory {
    #[serde(default)]
    pub contacts: Vec<Contact>,
    #[serde(default)]
    pub friends: Vec<Contact>,
    #[serde(default)]
    pub groups: Vec<Contact>,
}

impl ContactDirectory {
    /// Look up a contact by id across all lists
    pub fn find(&self, wxid: &str) -> Option<&Contact> {
        self.contacts
            .iter()
            .chain(self.friends.iter())
            .chain(self.groups.iter())
            .find(|c| c.wxid == wxid)
    }
}

/// A member of a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub wxid: String,
    #[serde(default)]
    pub nickname: String,
}

/// Inclusive range of whole seconds (or minutes) used for randomised waits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min: u64,
    pub max: u64,
}

impl DelayRange {
    /// Build a range, clamping the upper bound so that `max >= min`
    pub fn new(min: u64, max: u64) -> Self {
        Self {
            min,
            max: max.max(min),
        }
    }

    /// Fixed delay
    pub fn fixed(value: u64) -> Self {
        Self::new(value, value)
    }

    /// Both bounds are zero: no wait at all
    pub fn is_zero(&self) -> bool {
        self.min == 0 && self.max == 0
    }

    /// Effective upper bound used for sampling
    pub fn upper(&self) -> u64 {
        self.max.max(self.min)
    }

    /// Draw one value uniformly from `[min, max]`, or the fixed value when `min == max`
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        let upper = self.upper();
        if self.min == upper {
            self.min
        } else {
            rng.gen_range(self.min..=upper)
        }
    }

    /// Sample a value in seconds as a `Duration`
    pub fn sample_secs<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        Duration::from_secs(self.sample(rng))
    }
}

impl Default for DelayRange {
    fn default() -> Self {
        Self::new(1, 5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_group_id_detection() {
        assert!(is_group_id("123456@chatroom"));
        assert!(!is_group_id("wxid_abc"));
    }

    #[test]
    fn test_delay_range_clamps_upper_bound() {
        let range = DelayRange::new(5, 2);
        assert_eq!(range.min, 5);
        assert_eq!(range.max, 5);

        // Deserialised ranges bypass `new`, sampling must still respect the clamp
        let raw = DelayRange { min: 7, max: 3 };
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..32 {
            assert_eq!(raw.sample(&mut rng), 7);
        }
    }

    #[test]
    fn test_delay_range_sample_within_bounds() {
        let range = DelayRange::new(1, 3);
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            let v = range.sample(&mut rng);
            assert!((1..=3).contains(&v));
        }
        assert!(DelayRange::new(0, 0).is_zero());
        assert!(!DelayRange::fixed(1).is_zero());
    }

    #[test]
    fn test_contact_display_name() {
        let mut contact = Contact {
            wxid: "wxid_a".to_string(),
            nickname: "Alice".to_string(),
            remarks: String::new(),
        };
        assert_eq!(contact.display_name(), "Alice");
        contact.remarks = "Boss".to_string();
        assert_eq!(contact.display_name(), "Boss");
    }
}
