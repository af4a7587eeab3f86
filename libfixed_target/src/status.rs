/// Progress of a long running chip operation, sent to whoever is displaying it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationStatus {
    pub progress: f32,
    pub step: usize,
    pub total: usize,
    /// Human readable label of the current step (e.g. the block being visited)
    pub label: String,
}

impl OperationStatus {
    pub fn new(step: usize, total: usize, label: &str) -> Self {
        let progress = if total == 0 {
            1.0
        } else {
            step as f32 / total as f32
        };
        Self {
            progress,
            step,
            total,
            label: label.to_string(),
        }
    }
}
