use lovisec_avatar::{Avatar, Cell, GRID_SIZE};
use lovisec_types::models::{Comment, Profile, ReactionKind, ReactionTally, Secret};

/// Terminal form of a feed item.
pub trait Render {
    fn render(&self, mine: Option<ReactionKind>) -> String;
}

impl Render for Secret {
    fn render(&self, mine: Option<ReactionKind>) -> String {
        let mut out = format!(
            "[{}] {}\n  {}\n",
            self.id,
            self.created_at.format("%Y-%m-%d %H:%M"),
            self.content
        );
        if let Some(url) = &self.image_url {
            out.push_str(&format!("  image: {url}\n"));
        }
        out.push_str(&format!("  {}\n", tally(&self.reactions, mine)));
        out
    }
}

impl Render for Comment {
    fn render(&self, mine: Option<ReactionKind>) -> String {
        let mut out = format!(
            "  [{}] {} {}\n    {}\n",
            self.id,
            author(self.profile.as_ref()),
            self.created_at.format("%Y-%m-%d %H:%M"),
            self.content
        );
        if let Some(url) = &self.image_url {
            out.push_str(&format!("    image: {url}\n"));
        }
        out.push_str(&format!("    {}\n", tally(&self.reactions, mine)));
        out
    }
}

fn author(profile: Option<&Profile>) -> &str {
    profile.map_or("anónimo", |p| p.username.as_str())
}

/// `turbio 2 | impresionante 0 | noMeGusta 1`, with the viewer's pick starred.
pub fn tally(tally: &ReactionTally, mine: Option<ReactionKind>) -> String {
    ReactionKind::ALL
        .iter()
        .map(|&kind| {
            let star = if mine == Some(kind) { "*" } else { "" };
            format!("{star}{kind} {}", tally.get(kind))
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

/// The avatar grid drawn with block characters, two columns per cell.
pub fn avatar_grid(avatar: &Avatar) -> String {
    let mut out = String::new();
    for row in 0..GRID_SIZE {
        for col in 0..GRID_SIZE {
            out.push_str(match avatar.cell(row, col) {
                Cell::Empty => "  ",
                Cell::Base => "██",
                Cell::Dark => "▓▓",
                Cell::Light => "░░",
            });
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_marks_own_reaction() {
        let line = tally(&ReactionTally::new(2, 0, 1), Some(ReactionKind::NoMeGusta));
        assert_eq!(line, "turbio 2 | impresionante 0 | *noMeGusta 1");
    }

    #[test]
    fn grid_is_mirrored_vertically() {
        let grid = avatar_grid(&Avatar::from_seed("luna"));
        let rows: Vec<_> = grid.lines().collect();
        assert_eq!(rows.len(), GRID_SIZE);
        assert_eq!(rows[0], rows[4]);
        assert_eq!(rows[1], rows[3]);
    }
}
