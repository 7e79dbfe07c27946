use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use owo_colors::OwoColorize;
use reelcal_core::Release;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

pub fn print_missing_key(w: &mut dyn Write, color: ColorMode) -> std::io::Result<()> {
    let msg = "TMDB API key not configured. Set TMDB_API_KEY in .env or pass --api-key \
               (free key at https://www.themoviedb.org/settings/api).";
    if color.enabled() {
        writeln!(w, "{}", msg.yellow())?;
    } else {
        writeln!(w, "{}", msg)?;
    }
    writeln!(w)?;
    Ok(())
}

/// Print a month's releases, one block per release date.
pub fn print_month(
    w: &mut dyn Write,
    title: &str,
    by_date: &BTreeMap<String, Vec<Release>>,
    color: ColorMode,
) -> std::io::Result<()> {
    if color.enabled() {
        writeln!(w, "{}", title.bold())?;
    } else {
        writeln!(w, "{}", title)?;
    }

    if by_date.is_empty() {
        writeln!(w, "No releases")?;
        return Ok(());
    }

    for (date, releases) in by_date {
        writeln!(w)?;
        if color.enabled() {
            writeln!(w, "{}", date.cyan())?;
        } else {
            writeln!(w, "{}", date)?;
        }
        for release in releases {
            print_release(w, release, color)?;
        }
    }

    let total: usize = by_date.values().map(Vec::len).sum();
    writeln!(w)?;
    writeln!(w, "{} releases", total)?;
    Ok(())
}

fn print_release(w: &mut dyn Write, release: &Release, color: ColorMode) -> std::io::Result<()> {
    let score = format!("{:.1}", release.vote_average);
    if color.enabled() {
        writeln!(w, "  {} {}", release.title.bold(), score.dimmed())?;
    } else {
        writeln!(w, "  {} ({})", release.title, score)?;
    }

    let mut details = Vec::new();
    if !release.director.is_empty() {
        details.push(format!("dir. {}", release.director));
    }
    if !release.cast.is_empty() {
        details.push(release.cast.join(", "));
    }
    if !release.genres.is_empty() {
        details.push(release.genres.join("/"));
    }
    if !details.is_empty() {
        let line = details.join(" | ");
        if color.enabled() {
            writeln!(w, "    {}", line.dimmed())?;
        } else {
            writeln!(w, "    {}", line)?;
        }
    }
    Ok(())
}

pub fn print_cache_stats(w: &mut dyn Write, path: &Path, entries: usize) -> std::io::Result<()> {
    writeln!(w, "Cache: {}", path.display())?;
    writeln!(w, "Entries: {}", entries)?;
    if let Ok(meta) = std::fs::metadata(path) {
        writeln!(w, "Size: {} KiB", meta.len().div_ceil(1024))?;
    }
    Ok(())
}
