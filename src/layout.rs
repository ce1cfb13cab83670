//! Slot positions for the reference background.
//!
//! Positions are tuned to one specific background image, so a different
//! background needs a different table. The compositor only reads the table.

use serde::Deserialize;
use thiserror::Error;

pub const SKILL_SLOT_COUNT: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SlotPosition {
    pub x: i64,
    pub y: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SlotSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AvatarPlacement {
    /// Centered on both axes of the canvas.
    Centered,
    /// Centered horizontally, pinned at `y`.
    FixedY { y: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LayoutTable {
    pub skill_slots: Vec<SlotPosition>,
    pub weapon_skin_slot: SlotPosition,
    #[serde(default)]
    pub pet_skin_slot: Option<SlotPosition>,
    #[serde(default = "default_slot_size")]
    pub slot_size: SlotSize,
    #[serde(default = "default_avatar_placement")]
    pub avatar: AvatarPlacement,
}

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("layout needs exactly {SKILL_SLOT_COUNT} skill slots, got {0}")]
    SkillSlotCount(usize),
    #[error("slot size must be non-zero")]
    EmptySlotSize,
}

impl Default for LayoutTable {
    fn default() -> Self {
        Self {
            skill_slots: vec![
                SlotPosition { x: 485, y: 473 },
                SlotPosition { x: 295, y: 546 },
                SlotPosition { x: 290, y: 40 },
                SlotPosition { x: 479, y: 100 },
                SlotPosition { x: 550, y: 280 },
                SlotPosition { x: 100, y: 470 },
            ],
            weapon_skin_slot: SlotPosition { x: 600, y: 50 },
            pet_skin_slot: Some(SlotPosition { x: 80, y: 50 }),
            slot_size: default_slot_size(),
            avatar: default_avatar_placement(),
        }
    }
}

impl LayoutTable {
    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.skill_slots.len() != SKILL_SLOT_COUNT {
            return Err(LayoutError::SkillSlotCount(self.skill_slots.len()));
        }
        if self.slot_size.width == 0 || self.slot_size.height == 0 {
            return Err(LayoutError::EmptySlotSize);
        }
        Ok(())
    }

    /// Avatar position for a canvas of the given size. Canvases smaller than
    /// the slot put the avatar at a negative offset so it stays centered.
    pub fn avatar_position(&self, canvas_width: u32, canvas_height: u32) -> SlotPosition {
        let x = centered_offset(canvas_width, self.slot_size.width);
        let y = match self.avatar {
            AvatarPlacement::Centered => centered_offset(canvas_height, self.slot_size.height),
            AvatarPlacement::FixedY { y } => y,
        };
        SlotPosition { x, y }
    }
}

fn centered_offset(outer: u32, inner: u32) -> i64 {
    (outer as i64 - inner as i64).div_euclid(2)
}

fn default_slot_size() -> SlotSize {
    SlotSize {
        width: 130,
        height: 130,
    }
}

fn default_avatar_placement() -> AvatarPlacement {
    AvatarPlacement::Centered
}
