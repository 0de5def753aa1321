//! Text and JSON rendering of command reports.

use std::io::{self, Write};

use anyhow::Result;
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use serde::Serialize;

use crate::commands::{FailoverReport, PlanReport, RegionsReport};

/// Color scheme for terminal output.
struct Colors;

impl Colors {
    const HEADER: Color = Color::Magenta;
    const LABEL: Color = Color::Cyan;
    const TRIGGER: Color = Color::Green;
    const RESTART: Color = Color::Yellow;
    const DIM: Color = Color::DarkGrey;
}

/// Something a command prints.
pub trait Render: Serialize {
    fn render_text(&self, out: &mut impl Write) -> io::Result<()>;
}

pub fn print(report: &impl Render, json: bool) -> Result<()> {
    let mut stdout = io::stdout();
    if json {
        serde_json::to_writer_pretty(&mut stdout, report)?;
        writeln!(stdout)?;
    } else {
        report.render_text(&mut stdout)?;
    }
    stdout.flush()?;
    Ok(())
}

fn header(out: &mut impl Write, text: &str) -> io::Result<()> {
    execute!(
        out,
        SetForegroundColor(Colors::HEADER),
        Print(text),
        ResetColor,
        Print("\n"),
    )
}

fn task_line(out: &mut impl Write, label: &str, color: Color, tasks: &[String]) -> io::Result<()> {
    let list = if tasks.is_empty() {
        "-".to_string()
    } else {
        tasks.join(", ")
    };
    execute!(
        out,
        SetForegroundColor(Colors::LABEL),
        Print(format!("  {label:<15}")),
        SetForegroundColor(color),
        Print(list),
        ResetColor,
        Print("\n"),
    )
}

impl Render for RegionsReport {
    fn render_text(&self, out: &mut impl Write) -> io::Result<()> {
        header(
            out,
            &format!("{}: {} tasks in {} regions", self.job, self.tasks, self.regions.len()),
        )?;
        for region in &self.regions {
            execute!(
                out,
                SetForegroundColor(Colors::LABEL),
                Print(format!("  region {:<4}", region.index)),
                ResetColor,
                Print(region.tasks.join(", ")),
                SetForegroundColor(Colors::DIM),
                Print(format!("  ({} blocking inputs)\n", region.blocking_inputs)),
                ResetColor,
            )?;
        }
        Ok(())
    }
}

impl Render for PlanReport {
    fn render_text(&self, out: &mut impl Write) -> io::Result<()> {
        header(out, &format!("{}: checkpoint plan ({})", self.job, self.scope))?;
        task_line(out, "trigger", Colors::TRIGGER, &self.trigger)?;
        task_line(out, "wait for", Color::Reset, &self.wait_for)?;
        task_line(out, "commit to", Color::Reset, &self.commit_to)?;
        task_line(out, "finished", Colors::DIM, &self.finished)?;
        task_line(out, "fully finished", Colors::DIM, &self.fully_finished)
    }
}

impl Render for FailoverReport {
    fn render_text(&self, out: &mut impl Write) -> io::Result<()> {
        header(out, &format!("{}: {} failed ({})", self.job, self.failed, self.cause))?;
        task_line(out, "restart", Colors::RESTART, &self.restart)
    }
}
