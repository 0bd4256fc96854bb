//! Simulation events.

// SCHEDULER EVENTS ////////////////////////////////////////////////////////////////////////////////

pub mod scheduler {
    use serde::Serialize;

    use crate::core::common::{MachineId, TaskId, VmId};

    #[derive(Clone, Serialize)]
    pub struct NewTask {
        pub task: TaskId,
    }

    #[derive(Clone, Serialize)]
    pub struct TaskCompleted {
        pub task: TaskId,
    }

    #[derive(Clone, Serialize)]
    pub struct MigrationCompleted {
        pub vm: VmId,
    }

    #[derive(Clone, Serialize)]
    pub struct PeriodicCheck {}

    #[derive(Clone, Serialize)]
    pub struct MemoryWarning {
        pub machine: MachineId,
    }

    #[derive(Clone, Serialize)]
    pub struct SlaWarning {
        pub task: TaskId,
    }

    #[derive(Clone, Serialize)]
    pub struct StateChangeCompleted {
        pub machine: MachineId,
    }
}

// CLUSTER EVENTS //////////////////////////////////////////////////////////////////////////////////

pub mod cluster {
    use serde::Serialize;

    use crate::core::common::{TaskId, VmId};
    use crate::extensions::workload::TaskSpec;

    #[derive(Clone, Serialize)]
    pub struct TaskArrived {
        pub spec: TaskSpec,
    }

    #[derive(Clone, Serialize)]
    pub struct PlacementDeadline {
        pub task: TaskId,
    }

    #[derive(Clone, Serialize)]
    pub struct TaskFinished {
        pub task: TaskId,
    }

    #[derive(Clone, Serialize)]
    pub struct MigrationFinished {
        pub vm: VmId,
    }

    #[derive(Clone, Serialize)]
    pub struct PeriodicTick {}
}
