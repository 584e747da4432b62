//! Capability interface for the cloud resources the poller and the cleanup
//! ledger operate on.
//!
//! Resources are owned by the provider; this crate only observes them and,
//! at teardown, invokes whichever destruction capabilities they expose. The
//! core never inspects concrete types: it asks a resource for its
//! [`ResourceKind`] and for the optional [`Terminable`] / [`Deletable`]
//! capabilities.

use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::command::CommandError;

/// Closed classification used to order teardown.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ResourceKind {
    /// Compute instance. Torn down first so attached volumes are released.
    Instance,
    /// Block storage volume.
    Volume,
    /// Volume snapshot.
    Snapshot,
    /// Anything the teardown table does not know about.
    Other,
}

impl ResourceKind {
    /// Teardown order for recognised kinds, earliest first.
    pub const TEARDOWN_ORDER: [Self; 3] = [Self::Instance, Self::Volume, Self::Snapshot];

    /// Rank used to order teardown; lower ranks are destroyed first.
    ///
    /// Unrecognised kinds rank after every entry of
    /// [`ResourceKind::TEARDOWN_ORDER`].
    #[must_use]
    pub fn teardown_priority(self) -> usize {
        Self::TEARDOWN_ORDER
            .iter()
            .position(|kind| *kind == self)
            .unwrap_or(Self::TEARDOWN_ORDER.len())
    }

    /// Lowercase label used in logs and CLI output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Instance => "instance",
            Self::Volume => "volume",
            Self::Snapshot => "snapshot",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while observing or destroying a resource.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ResourceError {
    /// Raised when a provider CLI returns a non-zero exit status.
    #[error("{program} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Program that failed (typically `scw`).
        program: String,
        /// Exit status reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the command.
        stderr: String,
    },
    /// Raised when provider output cannot be parsed.
    #[error("failed to parse {resource} output: {message}")]
    Parse {
        /// Resource being described (for example `server srv-1@fr-par-1`).
        resource: String,
        /// Parser error message.
        message: String,
    },
    /// Raised by adapters when the provider reports a failure directly.
    #[error("{resource}: {message}")]
    Provider {
        /// Resource the failure relates to.
        resource: String,
        /// Provider supplied message.
        message: String,
    },
    /// Raised when command execution fails.
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// A cloud object whose status can be observed.
///
/// Some resource kinds materialise a status attribute as a side effect of
/// refreshing; others only report it as the refresh result. Implementations
/// override [`Resource::status`] only in the first case.
pub trait Resource: fmt::Display {
    /// Classification used for teardown ordering.
    fn kind(&self) -> ResourceKind;

    /// Refreshes provider state and returns the status reported by the
    /// refresh call.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError`] when the provider cannot be queried.
    fn refresh(&self) -> Result<String, ResourceError>;

    /// Status attribute materialised by the most recent refresh.
    fn status(&self) -> Option<String> {
        None
    }

    /// Exposes the terminate capability when the resource has one.
    fn as_terminable(&self) -> Option<&dyn Terminable> {
        None
    }

    /// Exposes the delete capability when the resource has one.
    fn as_deletable(&self) -> Option<&dyn Deletable> {
        None
    }
}

/// Resources that are shut down and then disappear (instances).
pub trait Terminable {
    /// Requests termination. Completion is observed by polling for the
    /// `terminated` status.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError`] when the provider rejects the request.
    fn terminate(&self) -> Result<(), ResourceError>;
}

/// Resources that are released with a single delete call.
pub trait Deletable {
    /// Deletes the resource.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError`] when the provider rejects the request.
    fn delete(&self) -> Result<(), ResourceError>;
}

/// Resources reachable over the network once running.
pub trait Addressable {
    /// Host name or IP address observed by the most recent refresh.
    fn network_address(&self) -> Option<String>;
}

macro_rules! forward_resource {
    ($($wrapper:ty),+ $(,)?) => {
        $(
            impl<T: Resource + ?Sized> Resource for $wrapper {
                fn kind(&self) -> ResourceKind {
                    (**self).kind()
                }

                fn refresh(&self) -> Result<String, ResourceError> {
                    (**self).refresh()
                }

                fn status(&self) -> Option<String> {
                    (**self).status()
                }

                fn as_terminable(&self) -> Option<&dyn Terminable> {
                    (**self).as_terminable()
                }

                fn as_deletable(&self) -> Option<&dyn Deletable> {
                    (**self).as_deletable()
                }
            }

            impl<T: Addressable + ?Sized> Addressable for $wrapper {
                fn network_address(&self) -> Option<String> {
                    (**self).network_address()
                }
            }
        )+
    };
}

forward_resource!(&T, Box<T>, Rc<T>);

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ResourceKind::Instance, 0)]
    #[case(ResourceKind::Volume, 1)]
    #[case(ResourceKind::Snapshot, 2)]
    #[case(ResourceKind::Other, 3)]
    fn teardown_priority_follows_table(#[case] kind: ResourceKind, #[case] expected: usize) {
        assert_eq!(kind.teardown_priority(), expected);
    }

    #[rstest]
    fn unknown_kinds_rank_after_the_table() {
        assert_eq!(
            ResourceKind::Other.teardown_priority(),
            ResourceKind::TEARDOWN_ORDER.len()
        );
    }
}
