//! Motion opcode vocabulary and its fixed-width wire codec.
//!
//! The motion controller speaks 4-character frames with an optional 2-digit
//! numeric suffix (`FW10`, `FR00`, `STOP`). Planner command strings use the
//! same grammar plus a `SNAP` form that may suffix an obstacle id
//! (`SNAP3`); `SNAP` frames branch to the capture worker and are never put
//! on the serial wire.

use std::fmt;

use thiserror::Error;

/// Closed vocabulary of hub commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// `RS00` – reset the controller's heading reference.
    ResetHeading,
    /// `FWxx` – move forward `xx` cells.
    Forward(u8),
    /// `BWxx` – move backward `xx` cells.
    Backward(u8),
    /// `FL00` – 3x1 arc turn, forward-left.
    ForwardLeft,
    /// `FR00` – 3x1 arc turn, forward-right.
    ForwardRight,
    /// `BL00` – 3x1 arc turn, backward-left.
    BackwardLeft,
    /// `BR00` – 3x1 arc turn, backward-right.
    BackwardRight,
    /// `OB01` – approach the small obstacle and stop.
    ApproachObstacle,
    /// `UL00` / `UR00` – go around the small obstacle, left/right.
    RoundSmallLeft,
    RoundSmallRight,
    /// `PL01` / `PR01` – go around the large obstacle, left/right.
    RoundLargeLeft,
    RoundLargeRight,
    /// `STOP` – halt immediately.
    Stop,
    /// `SNAP` – capture and classify an image at the current pose.
    Snap { obstacle_id: Option<u8> },
    /// `FIN` – end of queue.
    Fin,
}

/// Codec failure for a single frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpcodeError {
    #[error("unknown opcode frame {0:?}")]
    Unknown(String),
    #[error("bad numeric suffix in frame {0:?}")]
    BadSuffix(String),
}

impl Opcode {
    /// Render the frame string sent on the wire (and used in planner
    /// command lists).
    pub fn encode(&self) -> String {
        match self {
            Opcode::ResetHeading => "RS00".to_string(),
            Opcode::Forward(n) => format!("FW{n:02}"),
            Opcode::Backward(n) => format!("BW{n:02}"),
            Opcode::ForwardLeft => "FL00".to_string(),
            Opcode::ForwardRight => "FR00".to_string(),
            Opcode::BackwardLeft => "BL00".to_string(),
            Opcode::BackwardRight => "BR00".to_string(),
            Opcode::ApproachObstacle => "OB01".to_string(),
            Opcode::RoundSmallLeft => "UL00".to_string(),
            Opcode::RoundSmallRight => "UR00".to_string(),
            Opcode::RoundLargeLeft => "PL01".to_string(),
            Opcode::RoundLargeRight => "PR01".to_string(),
            Opcode::Stop => "STOP".to_string(),
            Opcode::Snap { obstacle_id: None } => "SNAP".to_string(),
            Opcode::Snap {
                obstacle_id: Some(id),
            } => format!("SNAP{id}"),
            Opcode::Fin => "FIN".to_string(),
        }
    }

    /// Parse a frame string. Total and rejecting: anything outside the
    /// catalogue is an error, never a panic.
    pub fn decode(frame: &str) -> Result<Self, OpcodeError> {
        let frame = frame.trim();
        match frame {
            "RS00" => return Ok(Opcode::ResetHeading),
            "FL00" => return Ok(Opcode::ForwardLeft),
            "FR00" => return Ok(Opcode::ForwardRight),
            "BL00" => return Ok(Opcode::BackwardLeft),
            "BR00" => return Ok(Opcode::BackwardRight),
            "OB01" => return Ok(Opcode::ApproachObstacle),
            "UL00" => return Ok(Opcode::RoundSmallLeft),
            "UR00" => return Ok(Opcode::RoundSmallRight),
            "PL01" => return Ok(Opcode::RoundLargeLeft),
            "PR01" => return Ok(Opcode::RoundLargeRight),
            "STOP" => return Ok(Opcode::Stop),
            "SNAP" => return Ok(Opcode::Snap { obstacle_id: None }),
            "FIN" => return Ok(Opcode::Fin),
            _ => {}
        }

        if let Some(suffix) = frame.strip_prefix("SNAP") {
            let id = suffix
                .parse::<u8>()
                .map_err(|_| OpcodeError::BadSuffix(frame.to_string()))?;
            return Ok(Opcode::Snap {
                obstacle_id: Some(id),
            });
        }
        if let Some(suffix) = frame.strip_prefix("FW") {
            return parse_magnitude(frame, suffix).map(Opcode::Forward);
        }
        if let Some(suffix) = frame.strip_prefix("BW") {
            return parse_magnitude(frame, suffix).map(Opcode::Backward);
        }

        Err(OpcodeError::Unknown(frame.to_string()))
    }

    /// Whether this opcode is framed to the motion controller. `SNAP`
    /// branches to the capture worker instead.
    pub fn is_wire(&self) -> bool {
        !matches!(self, Opcode::Snap { .. })
    }
}

fn parse_magnitude(frame: &str, suffix: &str) -> Result<u8, OpcodeError> {
    if suffix.len() != 2 {
        return Err(OpcodeError::BadSuffix(frame.to_string()));
    }
    suffix
        .parse::<u8>()
        .map_err(|_| OpcodeError::BadSuffix(frame.to_string()))
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}
