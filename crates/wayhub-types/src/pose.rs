//! Robot pose and grid heading.
//!
//! Headings travel on the wire as the even integers the operator protocol
//! uses (`0`/`2`/`4`/`6` for N/E/S/W); internally they are a closed enum.

use serde::{Deserialize, Serialize};

/// Compass heading on the arena grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Direction {
    North,
    East,
    South,
    West,
}

impl Direction {
    /// Heading after a 90-degree clockwise rotation.
    pub fn right(self) -> Self {
        match self {
            Direction::North => Direction::East,
            Direction::East => Direction::South,
            Direction::South => Direction::West,
            Direction::West => Direction::North,
        }
    }

    /// Heading after a 90-degree counter-clockwise rotation.
    pub fn left(self) -> Self {
        match self {
            Direction::North => Direction::West,
            Direction::West => Direction::South,
            Direction::South => Direction::East,
            Direction::East => Direction::North,
        }
    }

    /// Unit grid vector for this heading; x grows east, y grows north.
    pub fn unit(self) -> (i32, i32) {
        match self {
            Direction::North => (0, 1),
            Direction::East => (1, 0),
            Direction::South => (0, -1),
            Direction::West => (-1, 0),
        }
    }
}

impl From<Direction> for u8 {
    fn from(d: Direction) -> u8 {
        match d {
            Direction::North => 0,
            Direction::East => 2,
            Direction::South => 4,
            Direction::West => 6,
        }
    }
}

impl TryFrom<u8> for Direction {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Direction::North),
            2 => Ok(Direction::East),
            4 => Ok(Direction::South),
            6 => Ok(Direction::West),
            other => Err(format!("invalid direction value: {other}")),
        }
    }
}

/// The robot's position and heading on the arena grid.
///
/// Serializes to the operator-link `location` payload shape
/// (`{"x":..,"y":..,"d":..}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotPose {
    pub x: i32,
    pub y: i32,
    pub d: Direction,
}

impl RobotPose {
    pub fn new(x: i32, y: i32, d: Direction) -> Self {
        Self { x, y, d }
    }
}
