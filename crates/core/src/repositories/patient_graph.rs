//! Patient graph: directed master → slave relations.
//!
//! Only relations with `can_update_slave_appointments = true` grant authority; the others
//! are kept for display and do not widen any query.

use crate::patient::{Relation, RelationType};
use crate::store::Tables;
use crate::{CoreError, CoreResult};
use clinic_types::{PatientId, RelationId};
use std::collections::BTreeSet;

impl Tables {
    /// Patients `s` with an authorizing `Relation(p, s)`.
    pub fn slaves_of(&self, patient: PatientId) -> BTreeSet<PatientId> {
        self.relations
            .values()
            .filter(|r| r.master == patient && r.can_update_slave_appointments)
            .map(|r| r.slave)
            .collect()
    }

    /// Patients `m` with an authorizing `Relation(m, p)`.
    pub fn masters_of(&self, patient: PatientId) -> BTreeSet<PatientId> {
        self.relations
            .values()
            .filter(|r| r.slave == patient && r.can_update_slave_appointments)
            .map(|r| r.master)
            .collect()
    }

    /// `target = author ∨ target ∈ slaves_of(author)`.
    pub fn can_author_for(&self, author: PatientId, target: PatientId) -> bool {
        target == author || self.slaves_of(author).contains(&target)
    }

    /// Every relation (authorizing or not) where `master` is the master.
    pub fn relations_of_master(&self, master: PatientId) -> Vec<&Relation> {
        self.relations
            .values()
            .filter(|r| r.master == master)
            .collect()
    }

    pub fn relation_between(&self, master: PatientId, slave: PatientId) -> Option<&Relation> {
        self.relations
            .values()
            .find(|r| r.master == master && r.slave == slave)
    }

    /// Creates a relation; `(master, slave)` is unique and self-relations are rejected.
    pub fn add_relation(
        &mut self,
        master: PatientId,
        slave: PatientId,
        relation_type: RelationType,
        can_update_slave_appointments: bool,
    ) -> CoreResult<RelationId> {
        if master == slave {
            return Err(CoreError::InvalidInput(
                "a patient cannot be related to themselves".into(),
            ));
        }
        self.patient(master)?;
        self.patient(slave)?;
        if self.relation_between(master, slave).is_some() {
            return Err(CoreError::DuplicateRelation);
        }

        let relation = Relation {
            id: RelationId::new(),
            master,
            slave,
            relation_type,
            can_update_slave_appointments,
        };
        let id = relation.id;
        self.relations.insert(id, relation);
        Ok(id)
    }

    /// Changes the type of an existing relation.
    pub fn update_relation_type(
        &mut self,
        master: PatientId,
        slave: PatientId,
        relation_type: RelationType,
    ) -> CoreResult<()> {
        let relation = self
            .relations
            .values_mut()
            .find(|r| r.master == master && r.slave == slave)
            .ok_or_else(|| CoreError::not_found("relation", slave))?;
        relation.relation_type = relation_type;
        Ok(())
    }

    /// Removes the edge only; the slave's appointments are untouched.
    pub fn remove_relation(&mut self, master: PatientId, slave: PatientId) -> CoreResult<Relation> {
        let id = self
            .relation_between(master, slave)
            .map(|r| r.id)
            .ok_or_else(|| CoreError::not_found("relation", slave))?;
        self.relations
            .remove(&id)
            .ok_or_else(|| CoreError::not_found("relation", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::patient;

    fn family() -> (Tables, PatientId, PatientId, PatientId) {
        let mut t = Tables::new();
        let mother = t.insert_patient(patient("Petrova", "Olga", true)).unwrap();
        let child = t.insert_patient(patient("Petrov", "Ivan", false)).unwrap();
        let stranger = t.insert_patient(patient("Sidorov", "Oleg", true)).unwrap();
        t.add_relation(mother, child, RelationType::Child, true)
            .unwrap();
        (t, mother, child, stranger)
    }

    #[test]
    fn test_slaves_and_masters() {
        let (t, mother, child, stranger) = family();
        assert_eq!(t.slaves_of(mother), BTreeSet::from([child]));
        assert_eq!(t.masters_of(child), BTreeSet::from([mother]));
        assert!(t.slaves_of(stranger).is_empty());
    }

    #[test]
    fn test_can_author_for() {
        let (t, mother, child, stranger) = family();
        assert!(t.can_author_for(mother, mother));
        assert!(t.can_author_for(mother, child));
        assert!(!t.can_author_for(child, mother));
        assert!(!t.can_author_for(mother, stranger));
    }

    #[test]
    fn test_non_authorizing_relation_does_not_widen() {
        let (mut t, _, _, stranger) = family();
        let other = t.insert_patient(patient("Smirnov", "Ilya", true)).unwrap();
        t.add_relation(stranger, other, RelationType::Spouse, false)
            .unwrap();
        assert!(t.slaves_of(stranger).is_empty());
        assert_eq!(t.relations_of_master(stranger).len(), 1);
    }

    #[test]
    fn test_self_and_duplicate_relations_rejected() {
        let (mut t, mother, child, _) = family();
        assert!(matches!(
            t.add_relation(mother, mother, RelationType::Other, true),
            Err(CoreError::InvalidInput(_))
        ));
        assert!(matches!(
            t.add_relation(mother, child, RelationType::Other, true),
            Err(CoreError::DuplicateRelation)
        ));
        for p in t.patients.keys() {
            assert!(!t.slaves_of(*p).contains(p));
        }
    }

    #[test]
    fn test_remove_relation_revokes_authority() {
        let (mut t, mother, child, _) = family();
        t.remove_relation(mother, child).unwrap();
        assert!(!t.can_author_for(mother, child));
        assert!(t.remove_relation(mother, child).is_err());
    }
}
