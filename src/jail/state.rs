//! Create/delete phase tracking
//!
//! Each operation drives a state machine from the state-machines crate in
//! dynamic mode. The orchestrator reads the recorded phase to decide what
//! has to be undone when a step fails.

pub use create::CreateTracker;
pub use delete::DeleteTracker;

/// Where a create operation got to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreatePhase {
    Pending,
    Validated,
    Allocated,
    Rooted,
    Extracted,
    Committed,
    Skipped,
    Failed,
}

impl CreatePhase {
    fn from_state(s: &str) -> Self {
        match s {
            "Validated" => CreatePhase::Validated,
            "Allocated" => CreatePhase::Allocated,
            "Rooted" => CreatePhase::Rooted,
            "Extracted" => CreatePhase::Extracted,
            "Committed" => CreatePhase::Committed,
            "Skipped" => CreatePhase::Skipped,
            "Failed" => CreatePhase::Failed,
            _ => CreatePhase::Pending,
        }
    }

    /// Whether the jail root has been created by this operation
    pub fn owns_root(&self) -> bool {
        matches!(self, CreatePhase::Rooted | CreatePhase::Extracted)
    }
}

/// Where a delete operation got to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePhase {
    Requested,
    Located,
    Verified,
    Confirmed,
    Unlinked,
    Purged,
    Cancelled,
    Aborted,
}

impl DeletePhase {
    fn from_state(s: &str) -> Self {
        match s {
            "Located" => DeletePhase::Located,
            "Verified" => DeletePhase::Verified,
            "Confirmed" => DeletePhase::Confirmed,
            "Unlinked" => DeletePhase::Unlinked,
            "Purged" => DeletePhase::Purged,
            "Cancelled" => DeletePhase::Cancelled,
            "Aborted" => DeletePhase::Aborted,
            _ => DeletePhase::Requested,
        }
    }

    /// Whether anything on disk has been removed yet
    pub fn is_destructive(&self) -> bool {
        matches!(self, DeletePhase::Unlinked | DeletePhase::Purged)
    }
}

mod create {
    use super::CreatePhase;
    use crate::error;
    use state_machines::state_machine;

    state_machine! {
        name: CreateMachine,
        dynamic: true,
        initial: Pending,
        states: [Pending, Validated, Allocated, Rooted, Extracted, Committed, Skipped, Failed],
        events {
            validate {
                transition: { from: Pending, to: Validated }
            }
            allocate {
                transition: { from: Validated, to: Allocated }
            }
            skip {
                transition: { from: Allocated, to: Skipped }
            }
            root {
                transition: { from: Allocated, to: Rooted }
            }
            extract {
                transition: { from: Rooted, to: Extracted }
            }
            commit {
                transition: { from: Extracted, to: Committed }
            }
            fail {
                transition: { from: [Pending, Validated, Allocated, Rooted, Extracted], to: Failed }
            }
        }
    }

    /// Phase tracker for one create operation
    pub struct CreateTracker {
        machine: DynamicCreateMachine<()>,
        jail: String,
    }

    impl CreateTracker {
        pub fn new(jail: impl Into<String>) -> Self {
            Self {
                machine: CreateMachine::new(()).into_dynamic(),
                jail: jail.into(),
            }
        }

        pub fn phase(&self) -> CreatePhase {
            CreatePhase::from_state(self.machine.current_state())
        }

        fn handle(&mut self, event: CreateMachineEvent) -> error::Result<()> {
            let from = self.machine.current_state().to_string();
            self.machine.handle(event).map_err(|e| {
                let reason = format!("create of '{}' from {}: {:?}", self.jail, from, e);
                error::Error::Lifecycle(reason)
            })?;
            tracing::debug!(jail = %self.jail, phase = self.machine.current_state(), "create");
            Ok(())
        }

        pub fn validated(&mut self) -> error::Result<()> {
            self.handle(CreateMachineEvent::Validate)
        }

        pub fn allocated(&mut self) -> error::Result<()> {
            self.handle(CreateMachineEvent::Allocate)
        }

        pub fn skipped(&mut self) -> error::Result<()> {
            self.handle(CreateMachineEvent::Skip)
        }

        pub fn rooted(&mut self) -> error::Result<()> {
            self.handle(CreateMachineEvent::Root)
        }

        pub fn extracted(&mut self) -> error::Result<()> {
            self.handle(CreateMachineEvent::Extract)
        }

        pub fn committed(&mut self) -> error::Result<()> {
            self.handle(CreateMachineEvent::Commit)
        }

        pub fn failed(&mut self) -> error::Result<()> {
            self.handle(CreateMachineEvent::Fail)
        }
    }
}

mod delete {
    use super::DeletePhase;
    use crate::error;
    use state_machines::state_machine;

    state_machine! {
        name: DeleteMachine,
        dynamic: true,
        initial: Requested,
        states: [Requested, Located, Verified, Confirmed, Unlinked, Purged, Cancelled, Aborted],
        events {
            locate {
                transition: { from: Requested, to: Located }
            }
            verify {
                transition: { from: Located, to: Verified }
            }
            confirm {
                transition: { from: Verified, to: Confirmed }
            }
            cancel {
                transition: { from: Verified, to: Cancelled }
            }
            unlink {
                transition: { from: Confirmed, to: Unlinked }
            }
            purge {
                transition: { from: Unlinked, to: Purged }
            }
            abort {
                transition: { from: [Requested, Located, Verified, Confirmed, Unlinked], to: Aborted }
            }
        }
    }

    /// Phase tracker for one delete operation
    pub struct DeleteTracker {
        machine: DynamicDeleteMachine<()>,
        jail: String,
    }

    impl DeleteTracker {
        pub fn new(jail: impl Into<String>) -> Self {
            Self {
                machine: DeleteMachine::new(()).into_dynamic(),
                jail: jail.into(),
            }
        }

        pub fn phase(&self) -> DeletePhase {
            DeletePhase::from_state(self.machine.current_state())
        }

        fn handle(&mut self, event: DeleteMachineEvent) -> error::Result<()> {
            let from = self.machine.current_state().to_string();
            self.machine.handle(event).map_err(|e| {
                let reason = format!("delete of '{}' from {}: {:?}", self.jail, from, e);
                error::Error::Lifecycle(reason)
            })?;
            tracing::debug!(jail = %self.jail, phase = self.machine.current_state(), "delete");
            Ok(())
        }

        pub fn located(&mut self) -> error::Result<()> {
            self.handle(DeleteMachineEvent::Locate)
        }

        pub fn verified(&mut self) -> error::Result<()> {
            self.handle(DeleteMachineEvent::Verify)
        }

        pub fn confirmed(&mut self) -> error::Result<()> {
            self.handle(DeleteMachineEvent::Confirm)
        }

        pub fn cancelled(&mut self) -> error::Result<()> {
            self.handle(DeleteMachineEvent::Cancel)
        }

        pub fn unlinked(&mut self) -> error::Result<()> {
            self.handle(DeleteMachineEvent::Unlink)
        }

        pub fn purged(&mut self) -> error::Result<()> {
            self.handle(DeleteMachineEvent::Purge)
        }

        pub fn aborted(&mut self) -> error::Result<()> {
            self.handle(DeleteMachineEvent::Abort)
        }
    }
}
