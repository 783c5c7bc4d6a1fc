//! Transfer compliance: per-asset requirements evaluated against claims.
//!
//! A leg is compliant when the asset has no requirements, or when at least
//! one requirement has every sender condition satisfied by the sender's
//! claims and every receiver condition satisfied by the receiver's.

use std::collections::{HashMap, HashSet};

use polyload_types::{Claim, Condition, IdentityId, Leg, Ticker};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplianceRequirement {
    pub id: u32,
    pub sender_conditions: Vec<Condition>,
    pub receiver_conditions: Vec<Condition>,
}

#[derive(Debug, Default)]
pub struct ComplianceRules {
    requirements: HashMap<Ticker, Vec<ComplianceRequirement>>,
    claims: HashMap<IdentityId, HashSet<Claim>>,
}

impl ComplianceRules {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a requirement; ids count from 1 per ticker.
    pub fn add_requirement(
        &mut self,
        ticker: Ticker,
        sender_conditions: Vec<Condition>,
        receiver_conditions: Vec<Condition>,
    ) -> u32 {
        let list = self.requirements.entry(ticker).or_default();
        let id = u32::try_from(list.len()).map_or(u32::MAX, |n| n.saturating_add(1));
        list.push(ComplianceRequirement {
            id,
            sender_conditions,
            receiver_conditions,
        });
        id
    }

    #[must_use]
    pub fn requirements(&self, ticker: &Ticker) -> &[ComplianceRequirement] {
        self.requirements.get(ticker).map_or(&[], Vec::as_slice)
    }

    pub fn record_claim(&mut self, target: IdentityId, claim: Claim) {
        self.claims.entry(target).or_default().insert(claim);
    }

    fn holds(&self, did: &IdentityId, condition: &Condition) -> bool {
        let has = |claim: &Claim| self.claims.get(did).is_some_and(|c| c.contains(claim));
        match condition {
            Condition::IsPresent(claim) => has(claim),
            Condition::IsAbsent(claim) => !has(claim),
        }
    }

    #[must_use]
    pub fn allows(&self, leg: &Leg) -> bool {
        let requirements = self.requirements(&leg.asset);
        requirements.is_empty()
            || requirements.iter().any(|r| {
                r.sender_conditions
                    .iter()
                    .all(|c| self.holds(&leg.from.did, c))
                    && r.receiver_conditions
                        .iter()
                        .all(|c| self.holds(&leg.to.did, c))
            })
    }
}

#[cfg(test)]
mod tests {
    use polyload_types::{PortfolioId, Scope};

    use super::*;

    fn leg() -> Leg {
        Leg::new(
            PortfolioId::default_of(IdentityId([1; 32])),
            PortfolioId::default_of(IdentityId([2; 32])),
            Ticker::new("ACME").unwrap(),
            5,
        )
    }

    #[test]
    fn no_requirements_allows_everything() {
        assert!(ComplianceRules::new().allows(&leg()));
    }

    #[test]
    fn empty_requirement_allows_everything() {
        let mut rules = ComplianceRules::new();
        assert_eq!(rules.add_requirement(leg().asset, vec![], vec![]), 1);
        assert!(rules.allows(&leg()));
    }

    #[test]
    fn receiver_claim_gates_transfer() {
        let mut rules = ComplianceRules::new();
        let kyc = Claim::KnowYourCustomer(Scope::Ticker(leg().asset));
        rules.add_requirement(leg().asset, vec![], vec![Condition::IsPresent(kyc)]);
        assert!(!rules.allows(&leg()));
        rules.record_claim(IdentityId([2; 32]), kyc);
        assert!(rules.allows(&leg()));
    }

    #[test]
    fn blocked_sender_is_refused() {
        let mut rules = ComplianceRules::new();
        let blocked = Claim::Blocked(Scope::Identity(IdentityId([9; 32])));
        rules.add_requirement(leg().asset, vec![Condition::IsAbsent(blocked)], vec![]);
        assert!(rules.allows(&leg()));
        rules.record_claim(IdentityId([1; 32]), blocked);
        assert!(!rules.allows(&leg()));
    }
}
