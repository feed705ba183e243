use crate::core::ClientId;
use crate::schema::RelationshipKind;
use serde_json::Value as JsonValue;

/// Which side of a relationship a write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Server-acknowledged linkage (pushes, commit acknowledgments)
    Canonical,
    /// Local, uncommitted linkage (application writes)
    Local,
}

/// Members of one relationship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Linkage {
    One(Option<ClientId>),
    /// Set semantics; order is kept only for stable iteration
    Many(Vec<ClientId>),
}

impl Linkage {
    pub fn empty(kind: RelationshipKind) -> Self {
        match kind {
            RelationshipKind::BelongsTo => Linkage::One(None),
            RelationshipKind::HasMany => Linkage::Many(Vec::new()),
        }
    }

    pub fn one(&self) -> Option<ClientId> {
        match self {
            Linkage::One(member) => *member,
            Linkage::Many(members) => members.first().copied(),
        }
    }

    pub fn members(&self) -> Vec<ClientId> {
        match self {
            Linkage::One(member) => member.iter().copied().collect(),
            Linkage::Many(members) => members.clone(),
        }
    }

    pub fn contains(&self, id: ClientId) -> bool {
        match self {
            Linkage::One(member) => *member == Some(id),
            Linkage::Many(members) => members.contains(&id),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Linkage::One(member) => usize::from(member.is_some()),
            Linkage::Many(members) => members.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add a member (replacing it for a single linkage). Returns true on change.
    pub fn add(&mut self, id: ClientId) -> bool {
        match self {
            Linkage::One(member) => {
                let changed = *member != Some(id);
                *member = Some(id);
                changed
            }
            Linkage::Many(members) => {
                if members.contains(&id) {
                    false
                } else {
                    members.push(id);
                    true
                }
            }
        }
    }

    pub fn remove(&mut self, id: ClientId) -> bool {
        match self {
            Linkage::One(member) => {
                if *member == Some(id) {
                    *member = None;
                    true
                } else {
                    false
                }
            }
            Linkage::Many(members) => {
                let before = members.len();
                members.retain(|member| *member != id);
                before != members.len()
            }
        }
    }

    /// Membership equality, ignoring order
    pub fn same_members(&self, other: &Linkage) -> bool {
        self.len() == other.len() && self.members().iter().all(|id| other.contains(*id))
    }
}

/// State of one relationship on one record.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipState {
    pub kind: RelationshipKind,
    pub canonical: Linkage,
    pub current: Linkage,
    /// Remote URL for lazy loading
    pub link: Option<String>,
    pub meta: Option<JsonValue>,
    /// Linkage has been supplied at least once (by the server or locally)
    pub has_data: bool,
}

impl RelationshipState {
    pub fn new(kind: RelationshipKind) -> Self {
        Self {
            kind,
            canonical: Linkage::empty(kind),
            current: Linkage::empty(kind),
            link: None,
            meta: None,
            has_data: false,
        }
    }

    pub fn is_modified(&self) -> bool {
        !self.canonical.same_members(&self.current)
    }

    pub fn linkage(&self, mode: WriteMode) -> &Linkage {
        match mode {
            WriteMode::Canonical => &self.canonical,
            WriteMode::Local => &self.current,
        }
    }

    /// A canonical change flushes to the current linkage only when the
    /// relationship carries no local modification.
    pub fn add(&mut self, id: ClientId, mode: WriteMode) -> bool {
        self.has_data = true;
        match mode {
            WriteMode::Local => self.current.add(id),
            WriteMode::Canonical => {
                let flush = !self.is_modified();
                let changed = self.canonical.add(id);
                if flush {
                    self.current = self.canonical.clone();
                }
                changed
            }
        }
    }

    pub fn remove(&mut self, id: ClientId, mode: WriteMode) -> bool {
        match mode {
            WriteMode::Local => self.current.remove(id),
            WriteMode::Canonical => {
                let flush = !self.is_modified();
                let changed = self.canonical.remove(id);
                if flush {
                    self.current = self.canonical.clone();
                }
                changed
            }
        }
    }

    /// Remove a member from both sides; used when the member leaves the cache.
    pub fn forget(&mut self, id: ClientId) {
        self.canonical.remove(id);
        self.current.remove(id);
    }

    pub fn rollback(&mut self) {
        self.current = self.canonical.clone();
    }

    /// Adopt the member order of `order` when the targeted side already
    /// holds exactly those members.
    pub fn reorder(&mut self, order: &[ClientId], mode: WriteMode) {
        if !self.kind.is_many() {
            return;
        }
        let target = Linkage::Many(order.to_vec());
        match mode {
            WriteMode::Local => {
                if self.current.same_members(&target) {
                    self.current = target;
                }
            }
            WriteMode::Canonical => {
                if self.canonical.same_members(&target) {
                    if self.current.same_members(&self.canonical) {
                        self.current = target.clone();
                    }
                    self.canonical = target;
                }
            }
        }
    }
}
