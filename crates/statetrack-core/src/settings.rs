//! Comparison policy.
//!
//! A [`SettingsSpec`] is plain serializable content. [`Settings::intern`]
//! turns it into the canonical shared instance for that content, so equal
//! content always selects the same cache partitions.

use crate::errors::{ExError, StateError};
use crate::object::{MemberInfo, MemberKind, TypeShape};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// How non-immutable reference members are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum ReferenceHandling {
    /// Fail with a configuration error
    #[default]
    Throw,
    /// Compare by instance identity
    References,
    /// Recurse; a reference loop is a configuration error
    Structural,
    /// Recurse; a repeated ancestor pair is linked instead of recomputed
    StructuralWithReferenceLoops,
}

impl ReferenceHandling {
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ReferenceHandling::Structural | ReferenceHandling::StructuralWithReferenceLoops
        )
    }
}

impl fmt::Display for ReferenceHandling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Which declared members take part in a comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum MemberSelection {
    /// Properties, calculated properties and indexers
    #[default]
    Properties,
    /// Stored fields only
    Fields,
}

/// A member identified by declaring type and name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemberKey {
    pub type_name: String,
    pub member: String,
}

impl MemberKey {
    pub fn new(type_name: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            member: member.into(),
        }
    }
}

/// Serializable settings content
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsSpec {
    pub reference_handling: ReferenceHandling,
    pub selection: MemberSelection,
    pub ignored_members: BTreeSet<MemberKey>,
    pub ignored_types: BTreeSet<String>,
    pub immutable_types: BTreeSet<String>,
}

/// Canonical, shared comparison policy
pub struct Settings {
    id: u64,
    spec: SettingsSpec,
    members: Mutex<HashMap<usize, Arc<[&'static MemberInfo]>>>,
}

static NEXT_SETTINGS_ID: AtomicU64 = AtomicU64::new(1);

fn interned() -> &'static Mutex<HashMap<SettingsSpec, Arc<Settings>>> {
    static INTERNED: OnceLock<Mutex<HashMap<SettingsSpec, Arc<Settings>>>> = OnceLock::new();
    INTERNED.get_or_init(|| Mutex::new(HashMap::new()))
}

impl Settings {
    /// The canonical instance for `spec`
    pub fn intern(spec: SettingsSpec) -> Arc<Settings> {
        let mut table = interned().lock();
        if let Some(existing) = table.get(&spec) {
            return existing.clone();
        }
        let settings = Arc::new(Settings {
            id: NEXT_SETTINGS_ID.fetch_add(1, Ordering::Relaxed),
            spec: spec.clone(),
            members: Mutex::new(HashMap::new()),
        });
        tracing::debug!(
            settings = settings.id,
            reference_handling = %spec.reference_handling,
            "settings interned"
        );
        table.insert(spec, settings.clone());
        settings
    }

    /// Default member selection with no exclusions
    pub fn get_or_create(reference_handling: ReferenceHandling) -> Arc<Settings> {
        Self::intern(SettingsSpec {
            reference_handling,
            ..SettingsSpec::default()
        })
    }

    /// Parse settings content from JSON
    pub fn from_json(json: &str) -> Result<Arc<Settings>, ExError> {
        let spec: SettingsSpec = serde_json::from_str(json).map_err(|e| {
            ExError::new(crate::errors::ExErrorKind::InvalidSettings)
                .with_op("settings_from_json")
                .with_message(format!("settings are not valid JSON: {}", e))
        })?;
        Ok(Self::intern(spec))
    }

    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }

    /// Partition key for caches
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn spec(&self) -> &SettingsSpec {
        &self.spec
    }

    pub fn reference_handling(&self) -> ReferenceHandling {
        self.spec.reference_handling
    }

    pub fn is_ignored_member(&self, member: &MemberInfo) -> bool {
        self.spec
            .ignored_members
            .iter()
            .any(|k| k.type_name == member.declaring_type && k.member == member.name)
    }

    pub fn is_ignored_type(&self, shape: &TypeShape) -> bool {
        self.spec.ignored_types.contains(shape.name)
    }

    /// Intrinsically immutable or declared immutable here
    pub fn is_immutable(&self, shape: &TypeShape) -> bool {
        shape.immutable || self.spec.immutable_types.contains(shape.name)
    }

    pub(crate) fn is_selected(&self, member: &MemberInfo) -> bool {
        match self.spec.selection {
            MemberSelection::Fields => member.kind == MemberKind::Field,
            MemberSelection::Properties => member.kind != MemberKind::Field,
        }
    }

    /// Members of `shape` that take part in comparison, in declaration order.
    ///
    /// Computed once per shape and settings.
    ///
    /// # Errors
    ///
    /// `UnsupportedMember` when a selected, non-ignored member is an indexer.
    pub fn members_of(
        &self,
        shape: &'static TypeShape,
    ) -> Result<Arc<[&'static MemberInfo]>, ExError> {
        let key = shape as *const TypeShape as usize;
        if let Some(members) = self.members.lock().get(&key) {
            return Ok(members.clone());
        }

        let mut selected = Vec::new();
        for member in shape.members {
            if !self.is_selected(member) || self.is_ignored_member(member) {
                continue;
            }
            if member.kind == MemberKind::Indexer {
                return Err(StateError::UnsupportedIndexer {
                    type_name: shape.name.to_string(),
                    member: member.name.to_string(),
                }
                .into());
            }
            selected.push(member);
        }

        let members: Arc<[&'static MemberInfo]> = selected.into();
        self.members.lock().insert(key, members.clone());
        Ok(members)
    }

    /// Position of `member` in [`Settings::members_of`]
    pub(crate) fn ordinal_of(
        &self,
        shape: &'static TypeShape,
        member: &MemberInfo,
    ) -> Result<Option<usize>, ExError> {
        Ok(self
            .members_of(shape)?
            .iter()
            .position(|m| std::ptr::eq(*m, member)))
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("id", &self.id)
            .field("spec", &self.spec)
            .finish()
    }
}

/// Fluent construction of [`Settings`]
#[derive(Debug, Default)]
pub struct SettingsBuilder {
    spec: SettingsSpec,
    duplicate: Option<String>,
}

impl SettingsBuilder {
    pub fn ignore_member(mut self, type_name: &str, member: &str) -> Self {
        if !self.spec.ignored_members.insert(MemberKey::new(type_name, member)) {
            self.note_duplicate(format!("the ignored member {}.{}", type_name, member));
        }
        self
    }

    pub fn ignore_type(mut self, type_name: &str) -> Self {
        if !self.spec.ignored_types.insert(type_name.to_string()) {
            self.note_duplicate(format!("the ignored type {}", type_name));
        }
        self
    }

    pub fn add_immutable_type(mut self, type_name: &str) -> Self {
        if !self.spec.immutable_types.insert(type_name.to_string()) {
            self.note_duplicate(format!("the immutable type {}", type_name));
        }
        self
    }

    pub fn selection(mut self, selection: MemberSelection) -> Self {
        self.spec.selection = selection;
        self
    }

    pub fn reference_handling(mut self, handling: ReferenceHandling) -> Self {
        self.spec.reference_handling = handling;
        self
    }

    fn note_duplicate(&mut self, what: String) {
        self.duplicate.get_or_insert(what);
    }

    /// # Errors
    ///
    /// `InvalidSettings` when the same exclusion was registered twice.
    pub fn build(self) -> Result<Arc<Settings>, ExError> {
        if let Some(what) = self.duplicate {
            return Err(ExError::from(StateError::DuplicateSetting { what }).with_op("build_settings"));
        }
        Ok(Settings::intern(self.spec))
    }
}
