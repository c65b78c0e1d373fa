use crate::command::{Command, CommandKind, MotionCode};
use crate::geometry::Position;
use crate::Mm;

/// Drops G0/G1 moves that go nowhere: no extrusion, no feed rate, and a target within tolerance
/// of where the machine already is. Lines carrying a tag or layer marker always stay, since later
/// passes segment by them.
///
/// The tracked position follows the retained stream only. A dropped move never moved the machine,
/// and this is also what makes filtering twice the same as filtering once.
#[derive(Debug, Clone, Copy)]
pub struct RedundantMoveFilter {
    tolerance: Mm,
}

impl RedundantMoveFilter {
    pub fn new(tolerance: Mm) -> RedundantMoveFilter {
        RedundantMoveFilter { tolerance }
    }

    pub fn filter(&self, commands: Vec<Command>) -> Vec<Command> {
        let mut tracked: Option<Position> = None;
        let mut kept = Vec::with_capacity(commands.len());
        for command in commands {
            if tracked.is_some_and(|at| self.is_redundant(&command, &at)) {
                continue;
            }
            if tracked.is_some() || command.is_motion() {
                tracked = Some(command.after.position);
            }
            kept.push(command);
        }
        kept
    }

    pub fn is_redundant(&self, command: &Command, at: &Position) -> bool {
        // Arcs can come back to where they started and still draw a full circle.
        let straight = matches!(command.kind, CommandKind::Motion(MotionCode::Rapid | MotionCode::Linear));
        straight
            && !command.tag_marker
            && !command.layer_marker
            // a word we couldn't parse may still move the firmware
            && command.rejected.is_empty()
            && !command.has_param('E')
            && command.feed_rate().is_none()
            && !command.is_depositing
            && command.after.position.is_within(at, self.tolerance)
    }
}
