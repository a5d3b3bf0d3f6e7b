use shared::domain::{
    AppliedControl, Asset, ControlStatus, Criticality, RemediationTask, TaskPriority, TaskStatus,
};

/// Composite id of the task an applied control implies on an asset.
pub fn task_id(asset: &Asset, control: &AppliedControl) -> String {
    format!("{}-{}", asset.id, control.id)
}

/// Task status shown for an applied control; `None` once it is implemented.
pub fn task_status_for(status: ControlStatus) -> Option<TaskStatus> {
    match status {
        ControlStatus::Incomplete => Some(TaskStatus::ToDo),
        ControlStatus::Planned => Some(TaskStatus::InProgress),
        ControlStatus::Implemented => None,
    }
}

/// Reverse mapping used when a task update is written back onto the asset.
pub fn control_status_for(status: TaskStatus) -> ControlStatus {
    match status {
        TaskStatus::ToDo => ControlStatus::Incomplete,
        TaskStatus::InProgress => ControlStatus::Planned,
        TaskStatus::Complete => ControlStatus::Implemented,
    }
}

pub fn priority_for(criticality: Criticality) -> TaskPriority {
    match criticality {
        Criticality::High => TaskPriority::High,
        Criticality::Medium | Criticality::Low => TaskPriority::Medium,
    }
}

/// One task per (asset, applied control) pair that is not yet implemented, in
/// asset order then control order.
pub fn derive_tasks(assets: &[Asset]) -> Vec<RemediationTask> {
    assets
        .iter()
        .flat_map(|asset| {
            asset.controls.iter().filter_map(move |control| {
                let status = task_status_for(control.status)?;
                Some(RemediationTask {
                    id: task_id(asset, control),
                    asset_id: asset.id.clone(),
                    control_id: control.id.clone(),
                    asset_name: asset.name.clone(),
                    control_name: control.name.clone(),
                    status,
                    priority: priority_for(asset.criticality),
                })
            })
        })
        .collect()
}

#[cfg(test)]
#[path = "tests/tasks_tests.rs"]
mod tests;
