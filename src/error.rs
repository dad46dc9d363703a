use core::fmt;

/// Failure raised at the mutation boundary. The world is left unchanged
/// whenever one of these is returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhysicsError {
    /// A pre-sized pool is full; the operation was refused.
    CapacityExceeded {
        resource: &'static str,
        capacity: usize,
    },
    /// A tunable or argument is out of range or non-finite.
    InvalidArgument { reason: &'static str },
    /// The shape is already attached to another body.
    ShapeAlreadyAttached,
    /// Remove-shape on a shape the body does not own.
    ShapeNotPresent,
    /// Attaching a mass-zero shape while asking for mass recomputation.
    ZeroMassShape,
    /// A constraint was added but never produced solver rows.
    MissingConstraintInitialization,
}

impl fmt::Display for PhysicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CapacityExceeded { resource, capacity } => {
                write!(f, "{resource} pool capacity exceeded (capacity={capacity})")
            }
            Self::InvalidArgument { reason } => write!(f, "invalid argument: {reason}"),
            Self::ShapeAlreadyAttached => write!(f, "shape is already attached to a body"),
            Self::ShapeNotPresent => write!(f, "shape is not attached to this body"),
            Self::ZeroMassShape => {
                write!(f, "shape has zero mass; attach it without mass recomputation")
            }
            Self::MissingConstraintInitialization => {
                write!(f, "constraint was never initialized with solver rows")
            }
        }
    }
}

impl std::error::Error for PhysicsError {}
