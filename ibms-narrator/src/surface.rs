use ibms_types::TurnStage;

/// The single, progressively revealed output area of a turn.
///
/// `render` receives the full sanitized text so far, not a delta: content can
/// shrink between calls when a reasoning block opens.
pub trait OutputSurface: Send {
    fn render(&mut self, text: &str);

    fn stage(&mut self, _stage: TurnStage) {}
}

/// Surface that drops everything.
pub struct NullSurface;

impl OutputSurface for NullSurface {
    fn render(&mut self, _text: &str) {}
}

/// Surface that keeps every frame and stage, for inspection after a turn.
#[derive(Default)]
pub struct CapturedSurface {
    pub frames: Vec<String>,
    pub stages: Vec<TurnStage>,
}

impl CapturedSurface {
    pub fn last_frame(&self) -> Option<&str> {
        self.frames.last().map(String::as_str)
    }
}

impl OutputSurface for CapturedSurface {
    fn render(&mut self, text: &str) {
        self.frames.push(text.to_string());
    }

    fn stage(&mut self, stage: TurnStage) {
        self.stages.push(stage);
    }
}
