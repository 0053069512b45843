use std::fmt;

use crate::cat240::Body;

///
/// One character per eight cells, showing roughly how much echo there is.
/// Used in trace logging only.
///
pub struct PrintableCells<'a>(&'a Body);

impl<'a> PrintableCells<'a> {
    pub fn new(body: &'a Body) -> PrintableCells<'a> {
        PrintableCells(body)
    }
}

fn symbol(sum: u64, full_scale: u64) -> char {
    // Thresholds are relative to eight cells at full scale
    match sum * 256 / (full_scale * 8).max(1) {
        0..1 => ' ',
        1..64 => '.',
        _ => '*',
    }
}

impl fmt::Display for PrintableCells<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bits = match self.0.video_resolution {
            1 | 2 | 4 | 8 | 16 | 32 => self.0.video_resolution,
            _ => 8,
        };
        let full_scale = (1u64 << bits) - 1;
        let mut sum: u64 = 0;
        let mut count: u32 = 0;

        write!(f, "[")?;
        for cell in self.0.cells() {
            sum += cell as u64;
            count += 1;

            if count == 8 {
                write!(f, "{}", symbol(sum, full_scale))?;
                count = 0;
                sum = 0;
            }
        }
        if count > 4 {
            write!(f, "{}", symbol(sum, full_scale))?;
        }
        write!(f, "]")?;
        Ok(())
    }
}
