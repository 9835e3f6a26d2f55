//! Text display binding: mirrors world objects as sprites on a character grid

use log::debug;
use serde_json::{json, Value};
use shared::{BaseBinding, GameWorld, Properties};

pub const DISPLAY_BINDING: &str = "display";

/// Half the side of the square area drawn by [`render_ascii`]
pub const VIEW_EXTENT: f64 = 300.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Sprite {
    pub x: f64,
    pub y: f64,
    pub glyph: char,
    pub label: Option<String>,
}

impl Sprite {
    fn with_glyph(glyph: char) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            glyph,
            label: None,
        }
    }
}

fn first_char(value: &Value, fallback: char) -> char {
    value
        .as_str()
        .and_then(|s| s.chars().next())
        .unwrap_or(fallback)
}

/// Builds the display binding.
///
/// `x`, `y` and `name` are copied onto the sprite. `appearance` is rendered:
/// `{ "type": "circle" }` or `{ "type": "square" }`, either optionally
/// overriding its glyph with a `glyph` field.
pub fn display_binding() -> BaseBinding<Sprite> {
    let mut binding = BaseBinding::new(DISPLAY_BINDING);

    binding.add_object_type("default", |_| Sprite::with_glyph('.'));
    binding.add_object_type("orbiter", |_| Sprite::with_glyph('*'));

    binding.add_property_handler("x", |sprite: &mut Sprite, value: &Value| {
        if let Some(x) = value.as_f64() {
            sprite.x = x;
        }
    });
    binding.add_property_handler("y", |sprite: &mut Sprite, value: &Value| {
        if let Some(y) = value.as_f64() {
            sprite.y = y;
        }
    });
    binding.add_property_handler("name", |sprite: &mut Sprite, value: &Value| {
        sprite.label = value.as_str().map(str::to_string);
    });

    binding.add_property_renderer("appearance", |sprite: &mut Sprite, rendered: Value| {
        sprite.glyph = first_char(&rendered, sprite.glyph);
    });
    binding.add_renderer("appearance", "circle", |description: &Properties| {
        description.get("glyph").cloned().unwrap_or_else(|| json!("o"))
    });
    binding.add_renderer("appearance", "square", |description: &Properties| {
        description.get("glyph").cloned().unwrap_or_else(|| json!("#"))
    });

    binding.on_add_object(|object, sprite| {
        debug!("Displaying {} as '{}'", object.id(), sprite.glyph);
    });
    binding.on_remove_object(|object, _| {
        debug!("Hiding {}", object.id());
    });

    binding
}

/// Every displayed sprite with its object id, in insertion order
pub fn sprites(world: &GameWorld) -> Vec<(&str, &Sprite)> {
    world
        .objects()
        .filter_map(|object| {
            object
                .linked_object::<Sprite>(DISPLAY_BINDING)
                .map(|sprite| (object.id(), sprite))
        })
        .collect()
}

/// Draws the sprites onto a `cols` x `rows` grid covering
/// `[-VIEW_EXTENT, VIEW_EXTENT]` on both axes. Later objects overwrite
/// earlier ones; sprites outside the view are clipped.
pub fn render_ascii(world: &GameWorld, cols: usize, rows: usize) -> String {
    if cols == 0 || rows == 0 {
        return String::new();
    }
    let mut grid = vec![vec![' '; cols]; rows];

    for (_, sprite) in sprites(world) {
        let col = ((sprite.x + VIEW_EXTENT) / (2.0 * VIEW_EXTENT) * cols as f64).floor();
        let row = ((VIEW_EXTENT - sprite.y) / (2.0 * VIEW_EXTENT) * rows as f64).floor();
        if col < 0.0 || row < 0.0 || col >= cols as f64 || row >= rows as f64 {
            continue;
        }
        grid[row as usize][col as usize] = sprite.glyph;
    }

    grid.into_iter()
        .map(|row| row.into_iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("\n")
}
