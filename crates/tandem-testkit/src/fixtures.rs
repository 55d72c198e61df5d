//! Test fixtures and helpers.

use tandem_core::Label;
use tandem_perms::{GrantLedger, Identity};
use tandem_store::CapabilityGrant;

/// A deterministic identity for participant `n`.
pub fn identity(n: u8) -> Identity {
    let mut signing = [0u8; 32];
    signing[0] = n;
    let mut encrypting = [0x5a; 32];
    encrypting[0] = n;
    Identity::from_seeds(&signing, encrypting)
}

/// Distinct identities for multi-party tests.
pub fn identities(count: usize) -> Vec<Identity> {
    (0..count).map(|i| identity(i as u8)).collect()
}

/// Record a grant for `client` in the host's ledger and return the client's
/// stored copy, as if an earlier session had completed the grant flow.
pub fn issue_grant(
    ledger: &mut GrantLedger,
    host: &Identity,
    client: &Identity,
    label: impl Into<Label>,
) -> CapabilityGrant {
    let record = ledger.issue(label.into(), client.verifying_key(), client.encrypting_key());
    CapabilityGrant {
        label: record.label,
        policy_key: record.policy_key,
        host_verifying_key: host.verifying_key(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identities_are_distinct_and_stable() {
        let ids = identities(3);
        assert_ne!(ids[0].verifying_key(), ids[1].verifying_key());
        assert_ne!(ids[1].encrypting_key(), ids[2].encrypting_key());
        assert_eq!(identity(1).verifying_key(), ids[1].verifying_key());
    }

    #[test]
    fn test_issue_grant_matches_ledger() {
        let host = identity(0);
        let client = identity(1);
        let mut ledger = GrantLedger::new();

        let grant = issue_grant(&mut ledger, &host, &client, "L1");

        let record = ledger.get(&client.verifying_key()).unwrap();
        assert_eq!(record.policy_key, grant.policy_key);
        assert_eq!(grant.host_verifying_key, host.verifying_key());
    }
}
