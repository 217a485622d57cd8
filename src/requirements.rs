//! Classroom requirements of a course load.
//!
//! Course loads carry their requirements as free text typed by staff, e.g.
//! `"Проектор, компьютеры"` or `"COMPUTER_LAB; projector"`. This module turns
//! that text into a type plus equipment flags the room allocator can check.

use crate::data::{Classroom, Equipment};
use log::debug;
use serde::Serialize;

/// Room types known to the classroom catalog.
pub const CLASSROOM_TYPES: [&str; 8] = [
    "LECTURE",
    "SEMINAR",
    "COMPUTER_LAB",
    "LABORATORY",
    "WORKSHOP",
    "AUDITORIUM",
    "GYM",
    "LIBRARY",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassroomRequirements {
    pub classroom_type: Option<String>,
    pub equipment: Equipment,
}

impl ClassroomRequirements {
    pub fn parse(text: &str) -> Self {
        let mut requirements = ClassroomRequirements::default();
        for token in text.split([',', ';', '/', '+', '\n']) {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            if !requirements.absorb(token) {
                debug!("ignoring unrecognised classroom requirement '{}'", token);
            }
        }
        requirements
    }

    fn absorb(&mut self, token: &str) -> bool {
        let lower = token.to_lowercase();

        if let Some(explicit) = lower
            .strip_prefix("type:")
            .or_else(|| lower.strip_prefix("type="))
        {
            let explicit = explicit.trim();
            if !explicit.is_empty() {
                self.classroom_type = Some(explicit.to_uppercase().replace([' ', '-'], "_"));
                return true;
            }
        }

        if lower.contains("компьютерный класс") || lower.contains("computer lab") {
            self.classroom_type = Some("COMPUTER_LAB".to_string());
            self.equipment.computers = true;
            return true;
        }

        let normalized = token.to_uppercase().replace([' ', '-'], "_");
        if CLASSROOM_TYPES.contains(&normalized.as_str()) {
            self.classroom_type = Some(normalized);
            return true;
        }

        let mut recognised = false;
        if lower.contains("лекцион") {
            self.classroom_type = Some("LECTURE".to_string());
            recognised = true;
        }
        if lower.contains("лаборатор") {
            self.classroom_type = Some("LABORATORY".to_string());
            recognised = true;
        }
        if lower.contains("спортзал") || lower.contains("спортивн") {
            self.classroom_type = Some("GYM".to_string());
            recognised = true;
        }
        if lower.contains("projector") || lower.contains("проектор") {
            self.equipment.projector = true;
            recognised = true;
        }
        if lower.contains("computer") || lower.contains("компьютер") || lower == "пк" {
            self.equipment.computers = true;
            recognised = true;
        }
        if lower.contains("whiteboard") || lower.contains("маркерн") || lower.contains("доска")
        {
            self.equipment.whiteboard = true;
            recognised = true;
        }
        recognised
    }

    /// Type and equipment check. Capacity is the allocator's concern.
    pub fn admits(&self, classroom: &Classroom) -> bool {
        let type_ok = match &self.classroom_type {
            Some(required) => classroom.classroom_type.eq_ignore_ascii_case(required),
            None => true,
        };
        type_ok && classroom.equipment().covers(&self.equipment)
    }

    pub fn is_empty(&self) -> bool {
        self.classroom_type.is_none() && self.equipment.is_empty()
    }
}
