
//! Progress reporting: `indicatif` display helpers for the CLI, and the
//! callback type the core fires while chewing through read files.
//!
//! The core never draws anything itself. Long passes accept a
//! [`ProgressReporter`], which invokes the caller's callback every
//! `callback_period` reads with a stage name and the current
//! processed/kept counts. A callback returning an error aborts the pass;
//! the error is propagated after files and buffers are released.

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};

/// `(stage, processed, kept) -> Result<()>`; an `Err` requests abort.
pub type ProgressFn<'a> = dyn FnMut(&'static str, u64, u64) -> Result<()> + 'a;

pub struct ProgressReporter<'a> {
    period: u64,
    callback: Option<&'a mut ProgressFn<'a>>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(period: u64, callback: Option<&'a mut ProgressFn<'a>>) -> Self {
        ProgressReporter {
            period: period.max(1),
            callback,
        }
    }

    /// Reporter that never fires; for tests and internal passes.
    pub fn silent() -> ProgressReporter<'static> {
        ProgressReporter {
            period: u64::MAX,
            callback: None,
        }
    }

    #[inline]
    pub fn tick(&mut self, stage: &'static str, processed: u64, kept: u64) -> Result<()> {
        if processed % self.period == 0 {
            if let Some(callback) = self.callback.as_mut() {
                (callback)(stage, processed, kept)?;
            }
        }
        Ok(())
    }
}

/// Create a progress bar of a specified length with consistent styling.
pub fn progress_bar(len: u64) -> ProgressBar {
    let progress_bar = ProgressBar::new(len);
    progress_bar.set_style(ProgressStyle::default_bar().template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {percent}% [{human_pos}/{human_len}] [Remaining: {eta}]",
    ).expect("Invalid progress style."));

    progress_bar
}

/// Spinner for passes whose total read count is unknown up front.
pub fn read_spinner(msg: &'static str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("[{elapsed_precise}] {spinner:.cyan} {human_pos} {msg}")
            .expect("Invalid progress style."),
    );
    spinner.set_message(msg);

    spinner
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reporter_fires_on_period() {
        let mut fired = Vec::new();
        {
            let mut callback = |stage: &'static str, processed: u64, kept: u64| -> Result<()> {
                fired.push((stage, processed, kept));
                Ok(())
            };
            let mut reporter = ProgressReporter::new(10, Some(&mut callback as &mut ProgressFn));
            for i in 1..=35 {
                reporter.tick("consume", i, i * 2).unwrap();
            }
        }
        assert_eq!(
            fired,
            vec![
                ("consume", 10, 20),
                ("consume", 20, 40),
                ("consume", 30, 60)
            ]
        );
    }

    #[test]
    fn test_callback_error_aborts() {
        let mut callback =
            |_: &'static str, _: u64, _: u64| -> Result<()> { anyhow::bail!("stop requested") };
        let mut reporter = ProgressReporter::new(1, Some(&mut callback as &mut ProgressFn));

        assert!(reporter.tick("consume", 1, 0).is_err());
    }

    #[test]
    fn test_silent_reporter_never_errors() {
        let mut reporter = ProgressReporter::silent();
        for i in 0..100 {
            assert!(reporter.tick("consume", i, 0).is_ok());
        }
    }
}
