//! Last-write-wins by modification time.
//!
//! Not on the default receive path, which accepts whatever arrives last.
//! Enabled with [`ConflictPolicy::Timestamp`](crate::ConflictPolicy).

use chrono::{DateTime, Utc};

use crate::record::Replicated;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Incoming,
    Existing,
}

/// Prefer the later modification time. A tie goes to the incoming version
/// so that re-applying the same record stays a write.
pub fn resolve(existing: DateTime<Utc>, incoming: DateTime<Utc>) -> Winner {
    if incoming >= existing {
        Winner::Incoming
    } else {
        Winner::Existing
    }
}

/// The more recently modified of two versions of one entity.
pub fn latest<'a, T: Replicated>(a: &'a T, b: &'a T) -> &'a T {
    match resolve(a.updated_at(), b.updated_at()) {
        Winner::Incoming => b,
        Winner::Existing => a,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_later_wins_and_ties_go_to_incoming() {
        let t = Utc::now();
        assert_eq!(resolve(t, t + Duration::seconds(1)), Winner::Incoming);
        assert_eq!(resolve(t + Duration::seconds(1), t), Winner::Existing);
        assert_eq!(resolve(t, t), Winner::Incoming);
    }
}
