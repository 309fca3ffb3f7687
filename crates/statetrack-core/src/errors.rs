use thiserror::Error;

/// Result type alias using the canonical [`ExError`]
pub type Result<T> = std::result::Result<T, ExError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Every failure the engine reports maps to one of these kinds. Each kind has
/// a stable code usable for programmatic handling and test assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExErrorKind {
    // Configuration
    /// A member shape the engine cannot compare (indexers)
    UnsupportedMember,
    /// A mutable reference member compared under `ReferenceHandling::Throw`
    AmbiguousReferenceHandling,
    /// A repeated ancestor pair under plain `ReferenceHandling::Structural`
    ReferenceLoop,
    /// A value that cannot emit change notifications was handed to a tracker
    NotTrackable,
    /// The two roots do not share a type shape
    ShapeMismatch,
    /// A calculated member disagrees between the two instances
    ReadonlyMemberDiffers,
    /// Settings were assembled inconsistently
    InvalidSettings,

    // Defects
    /// Ref-counting or cache bookkeeping went wrong
    InvariantViolation,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::UnsupportedMember => "ERR_UNSUPPORTED_MEMBER",
            ExErrorKind::AmbiguousReferenceHandling => "ERR_AMBIGUOUS_REFERENCE_HANDLING",
            ExErrorKind::ReferenceLoop => "ERR_REFERENCE_LOOP",
            ExErrorKind::NotTrackable => "ERR_NOT_TRACKABLE",
            ExErrorKind::ShapeMismatch => "ERR_SHAPE_MISMATCH",
            ExErrorKind::ReadonlyMemberDiffers => "ERR_READONLY_MEMBER_DIFFERS",
            ExErrorKind::InvalidSettings => "ERR_INVALID_SETTINGS",
            ExErrorKind::InvariantViolation => "ERR_INVARIANT_VIOLATION",
        }
    }

    /// Whether the kind describes a usage problem the caller can fix
    pub fn is_configuration(&self) -> bool {
        !matches!(self, ExErrorKind::InvariantViolation)
    }
}

/// Canonical structured error type
///
/// Carries the classification plus enough context (operation, type, member)
/// to point the caller at the offending part of the object graph.
#[derive(Debug, Clone, PartialEq)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    type_name: Option<String>,
    member: Option<String>,
    message: String,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            type_name: None,
            member: None,
            message: String::new(),
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add the name of the offending type
    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    /// Add the name of the offending member
    pub fn with_member(mut self, member: impl Into<String>) -> Self {
        self.member = Some(member.into());
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Get the error kind
    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Get the operation context, if any
    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    /// Get the offending type name, if any
    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    /// Get the offending member name, if any
    pub fn member(&self) -> Option<&str> {
        self.member.as_deref()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {}

// ========== End Error Facility ==========

/// Appends the standard "how to fix this" block naming the policy values and
/// the exclusions that would make the problem go away.
pub(crate) fn remediation(type_name: &str, member: Option<&str>) -> String {
    let mut text = String::from("Solve the problem by any of:\n");
    text.push_str("* Use Settings and specify how references are handled:\n");
    text.push_str(
        "  - ReferenceHandling::References means that only the root level members are compared and references are compared by identity.\n",
    );
    text.push_str(
        "  - ReferenceHandling::Structural means that a deep comparison is performed.\n",
    );
    text.push_str(
        "  - ReferenceHandling::StructuralWithReferenceLoops means that a deep comparison is performed and reference loops are tolerated.\n",
    );
    text.push_str(&format!("* Exclude the type {}.\n", type_name));
    if let Some(member) = member {
        text.push_str(&format!("* Exclude the member {}.{}.\n", type_name, member));
    }
    text
}

/// Domain failures raised while diffing or tracking
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    /// Indexed members cannot be enumerated
    #[error("Indexers are not supported.\n  - The property {type_name}.{member} is an indexer and not supported.")]
    UnsupportedIndexer { type_name: String, member: String },

    /// Mutable reference member met while the policy is `Throw`
    #[error("The member {type_name}.{member} holds the mutable reference type {value_type} and ReferenceHandling::Throw is active.")]
    AmbiguousMember {
        type_name: String,
        member: String,
        value_type: String,
    },

    /// Repeated ancestor pair under plain `Structural`
    #[error("The member {type_name}.{member} leads back to an ancestor of type {loop_type}, which is a reference loop.")]
    ReferenceLoop {
        type_name: String,
        member: String,
        loop_type: String,
    },

    /// Value without a change notifier
    #[error("The type {type_name} does not emit change notifications and cannot be tracked.")]
    NotTrackable { type_name: String },

    /// Roots of different shapes
    #[error("Cannot compare an instance of {x_type} with an instance of {y_type}.")]
    ShapeMismatch { x_type: String, y_type: String },

    /// Calculated member diverged
    #[error("The readonly property {type_name}.{member} differs after copy.\n - Source value: {x}.\n - Target value: {y}.\nThe property is of type {value_type}.")]
    ReadonlyMemberDiffers {
        type_name: String,
        member: String,
        x: String,
        y: String,
        value_type: String,
    },

    /// The same setting was registered twice on a builder
    #[error("Settings already contain {what}.")]
    DuplicateSetting { what: String },

    /// A payload vanished from its cache partition while handles were live
    #[error("Cache entry for {key} is missing while a handle is still live.")]
    StaleHandle { key: String },

    /// A cache partition did not hold the expected payload type
    #[error("Cache partition for {type_name} holds an unexpected payload type.")]
    PartitionTypeMismatch { type_name: String },
}

impl From<StateError> for ExError {
    fn from(err: StateError) -> Self {
        let message = err.to_string();
        match err {
            StateError::UnsupportedIndexer { type_name, member } => {
                let text = format!("{}\n{}", message, remediation(&type_name, Some(&member)));
                ExError::new(ExErrorKind::UnsupportedMember)
                    .with_type(type_name)
                    .with_member(member)
                    .with_message(text)
            }

            StateError::AmbiguousMember {
                type_name, member, ..
            } => {
                let text = format!("{}\n{}", message, remediation(&type_name, Some(&member)));
                ExError::new(ExErrorKind::AmbiguousReferenceHandling)
                    .with_type(type_name)
                    .with_member(member)
                    .with_message(text)
            }

            StateError::ReferenceLoop {
                type_name, member, ..
            } => {
                let text = format!("{}\n{}", message, remediation(&type_name, Some(&member)));
                ExError::new(ExErrorKind::ReferenceLoop)
                    .with_type(type_name)
                    .with_member(member)
                    .with_message(text)
            }

            StateError::NotTrackable { type_name } => {
                let text = format!("{}\n{}", message, remediation(&type_name, None));
                ExError::new(ExErrorKind::NotTrackable)
                    .with_type(type_name)
                    .with_message(text)
            }

            StateError::ShapeMismatch { x_type, .. } => ExError::new(ExErrorKind::ShapeMismatch)
                .with_type(x_type)
                .with_message(message),

            StateError::ReadonlyMemberDiffers {
                type_name, member, ..
            } => {
                let text = format!("{}\n{}", message, remediation(&type_name, Some(&member)));
                ExError::new(ExErrorKind::ReadonlyMemberDiffers)
                    .with_type(type_name)
                    .with_member(member)
                    .with_message(text)
            }

            StateError::DuplicateSetting { .. } => {
                ExError::new(ExErrorKind::InvalidSettings).with_message(message)
            }

            StateError::StaleHandle { .. } => {
                ExError::new(ExErrorKind::InvariantViolation).with_message(message)
            }

            StateError::PartitionTypeMismatch { type_name } => {
                ExError::new(ExErrorKind::InvariantViolation)
                    .with_type(type_name)
                    .with_message(message)
            }
        }
    }
}
