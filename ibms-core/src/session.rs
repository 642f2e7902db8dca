use ibms_types::ConversationTurn;
use uuid::Uuid;

/// One officer's conversation. Turns are appended, never edited or removed.
#[derive(Clone, Debug)]
pub struct Session {
    id: Uuid,
    turns: Vec<ConversationTurn>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            turns: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub(crate) fn append(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }
}
