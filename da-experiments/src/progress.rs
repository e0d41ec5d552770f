//! Progress reporting for long experiment loops.

use pbr::ProgressBar;
use std::borrow::Cow;
use std::io::Stdout;
use std::time::Duration;

pub struct ReportingIterator<I>
  where I: ExactSizeIterator,
{
  name: Cow<'static, str>,
  progress: ProgressBar<Stdout>,
  inner: I,
}

impl<I> ReportingIterator<I>
  where I: ExactSizeIterator,
{
  pub fn new(inner: I, name: Cow<'static, str>) -> ReportingIterator<I> {
    let mut p = ProgressBar::new(inner.len() as u64);
    p.show_speed = true;
    p.show_percent = true;
    p.show_counter = true;
    p.show_time_left = true;
    p.set_max_refresh_rate(Some(Duration::new(1, 0) / 60));
    p.message(&format!("{}: ", name));

    ReportingIterator { name, progress: p, inner }
  }
}

impl<I> Iterator for ReportingIterator<I>
  where I: ExactSizeIterator,
{
  type Item = I::Item;

  fn next(&mut self) -> Option<Self::Item> {
    match self.inner.next() {
      Some(v) => {
        self.progress.inc();
        Some(v)
      }
      None => {
        self.progress.finish_println(&format!("{} done\n", self.name));
        None
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn passes_every_item_through() {
    let items: Vec<usize> =
      ReportingIterator::new(0..5, Cow::Borrowed("test")).collect();
    assert_eq!(items, vec![0, 1, 2, 3, 4]);
  }
}
