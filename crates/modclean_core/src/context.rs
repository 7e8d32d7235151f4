use serde::Serialize;

use crate::record::{GroupHeader, GroupLabel, GroupType};
use crate::types::FormId;

/// Which cell and world own the records currently being walked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanContext {
    pub cell: Option<FormId>,
    pub world: Option<FormId>,
    pub cell_is_interior: bool,
}

#[derive(Debug, Clone, Copy)]
struct OpenGroup {
    end: u64,
    saved: ScanContext,
}

/// Tracks group nesting so a leaf record can be attributed to its cell and world.
///
/// Entering a group pushes the active context; once the walk passes the group's
/// end the context from before the group is restored.
#[derive(Debug, Default)]
pub struct GroupContextTracker {
    stack: Vec<OpenGroup>,
    current: ScanContext,
}

impl GroupContextTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn context(&self) -> ScanContext {
        self.current
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// End offset of the innermost open group.
    pub fn innermost_end(&self) -> Option<u64> {
        self.stack.last().map(|open| open.end)
    }

    pub fn enter(&mut self, group: &GroupHeader, end: u64) {
        self.stack.push(OpenGroup {
            end,
            saved: self.current,
        });

        match (group.group_type, group.label) {
            (GroupType::WorldChildren, GroupLabel::World(world)) => {
                self.current = ScanContext {
                    cell: None,
                    world: Some(world),
                    cell_is_interior: false,
                };
            }
            (GroupType::InteriorCellBlock, _) => {
                self.current = ScanContext {
                    cell: None,
                    world: None,
                    cell_is_interior: true,
                };
            }
            (group_type, GroupLabel::Cell(cell)) if group_type.is_cell_children() => {
                self.current.cell = Some(cell);
            }
            _ => {}
        }
    }

    /// Closes every group that ends at or before `pos`.
    pub fn leave_finished(&mut self, pos: u64) {
        while let Some(open) = self.stack.last() {
            if open.end > pos {
                break;
            }
            self.current = open.saved;
            self.stack.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{GroupContextTracker, ScanContext};
    use crate::record::{GroupHeader, GroupLabel, GroupType};
    use crate::types::{FormId, Tag};

    fn group(group_type: GroupType, label: GroupLabel) -> GroupHeader {
        GroupHeader {
            group_size: 0,
            label,
            group_type,
            stamp: 0,
            extra: 0,
        }
    }

    #[test]
    fn exterior_cell_inherits_world() {
        let mut tracker = GroupContextTracker::new();
        tracker.enter(&group(GroupType::TopLevel, GroupLabel::Top(Tag::WRLD)), 1000);
        tracker.enter(
            &group(GroupType::WorldChildren, GroupLabel::World(FormId(0x10))),
            900,
        );
        tracker.enter(
            &group(GroupType::ExteriorCellBlock, GroupLabel::Grid { x: 0, y: 0 }),
            800,
        );
        tracker.enter(
            &group(GroupType::CellTemporaryChildren, GroupLabel::Cell(FormId(0x20))),
            700,
        );

        assert_eq!(
            tracker.context(),
            ScanContext {
                cell: Some(FormId(0x20)),
                world: Some(FormId(0x10)),
                cell_is_interior: false,
            }
        );
        assert_eq!(tracker.depth(), 4);
        assert_eq!(tracker.innermost_end(), Some(700));
    }

    #[test]
    fn interior_block_clears_world() {
        let mut tracker = GroupContextTracker::new();
        tracker.enter(
            &group(GroupType::WorldChildren, GroupLabel::World(FormId(0x10))),
            500,
        );
        tracker.enter(&group(GroupType::InteriorCellBlock, GroupLabel::Block(0)), 400);
        tracker.enter(
            &group(GroupType::CellChildren, GroupLabel::Cell(FormId(0x20))),
            300,
        );

        let ctx = tracker.context();
        assert_eq!(ctx.cell, Some(FormId(0x20)));
        assert_eq!(ctx.world, None);
        assert!(ctx.cell_is_interior);
    }

    #[test]
    fn leaving_groups_restores_outer_context() {
        let mut tracker = GroupContextTracker::new();
        tracker.enter(
            &group(GroupType::WorldChildren, GroupLabel::World(FormId(0x10))),
            500,
        );
        tracker.enter(
            &group(GroupType::CellChildren, GroupLabel::Cell(FormId(0x20))),
            300,
        );

        tracker.leave_finished(299);
        assert_eq!(tracker.context().cell, Some(FormId(0x20)));

        tracker.leave_finished(300);
        assert_eq!(tracker.context().cell, None);
        assert_eq!(tracker.context().world, Some(FormId(0x10)));

        tracker.leave_finished(500);
        assert_eq!(tracker.context(), ScanContext::default());
        assert_eq!(tracker.depth(), 0);
    }
}
