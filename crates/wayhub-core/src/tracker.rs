//! Location tracker: pure pose transitions for acknowledged commands.
//!
//! `Forward`/`Backward` translate along the heading, one cell per unit. The
//! 3x1 arc turns displace 3 cells along the prior heading and 1 cell
//! laterally while rotating the heading a quarter turn; a reverse arc
//! rotates the heading opposite to its forward twin.
//!
//! Opcodes whose end pose depends on the terrain (obstacle approach and
//! go-around maneuvers) and non-motion opcodes return `None`: no pose
//! update, no location notification.

use wayhub_types::{Direction, Opcode, RobotPose};

/// Pose after an acknowledged `opcode`, or `None` when the command carries
/// no statically-known displacement.
pub fn apply(opcode: &Opcode, pose: RobotPose) -> Option<RobotPose> {
    match *opcode {
        Opcode::Forward(cells) => Some(translate(pose, i32::from(cells))),
        Opcode::Backward(cells) => Some(translate(pose, -i32::from(cells))),
        Opcode::ForwardLeft => Some(arc(pose, 3, pose.d.left(), pose.d.left())),
        Opcode::ForwardRight => Some(arc(pose, 3, pose.d.right(), pose.d.right())),
        Opcode::BackwardLeft => Some(arc(pose, -3, pose.d.left(), pose.d.right())),
        Opcode::BackwardRight => Some(arc(pose, -3, pose.d.right(), pose.d.left())),
        _ => None,
    }
}

fn translate(pose: RobotPose, cells: i32) -> RobotPose {
    let (dx, dy) = pose.d.unit();
    RobotPose::new(pose.x + dx * cells, pose.y + dy * cells, pose.d)
}

fn arc(pose: RobotPose, forward: i32, lateral: Direction, heading: Direction) -> RobotPose {
    let (fx, fy) = pose.d.unit();
    let (lx, ly) = lateral.unit();
    RobotPose::new(pose.x + fx * forward + lx, pose.y + fy * forward + ly, heading)
}
