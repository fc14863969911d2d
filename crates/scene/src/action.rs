use glam::{Vec2, Vec3};

/// A high-level edit the map understands.
///
/// Frontends translate their input into actions; the map never sees keys or
/// mouse buttons.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    /// Select the instance and movable light at this index.
    Select(usize),
    Deselect,
    /// Move the selected instance along the ground plane: `x` along world X,
    /// `y` along world Z.
    Nudge(Vec2),
    /// Place the selected movable light.
    SnapLight { position: Vec3, direction: Vec3 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_are_copy() {
        let a = Action::Nudge(Vec2::new(1.0, 0.0));
        let b = a;
        assert_eq!(a, b);
        assert!(matches!(Action::Select(3), Action::Select(3)));
    }
}
