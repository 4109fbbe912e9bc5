/// Odometer over a mixed-radix space: yields every combination of category
/// positions with the last axis varying fastest. Zero axes yield exactly one
/// empty combination; any empty axis yields none.
#[derive(Debug, Clone)]
pub struct Odometer {
    radices: Vec<usize>,
    current: Vec<usize>,
    done: bool,
}

impl Odometer {
    /// Creates an odometer over axes of the given sizes.
    #[must_use]
    pub fn new(radices: Vec<usize>) -> Self {
        let done = radices.iter().any(|&size| size == 0);
        Self {
            current: vec![0; radices.len()],
            radices,
            done,
        }
    }

    /// Total number of combinations.
    #[must_use]
    pub fn combinations(&self) -> usize {
        self.radices.iter().product()
    }
}

impl Iterator for Odometer {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.current.clone();
        self.done = true;
        for axis in (0..self.radices.len()).rev() {
            self.current[axis] += 1;
            if self.current[axis] < self.radices[axis] {
                self.done = false;
                break;
            }
            self.current[axis] = 0;
        }
        Some(item)
    }
}

/// Positions of flat index `index` decomposed over `radices` (row-major).
#[must_use]
pub fn decompose(mut index: usize, radices: &[usize]) -> Vec<usize> {
    let mut digits = vec![0; radices.len()];
    for (digit, &radix) in digits.iter_mut().zip(radices).rev() {
        if radix == 0 {
            continue;
        }
        *digit = index % radix;
        index /= radix;
    }
    digits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_axis_varies_fastest() {
        let combos: Vec<_> = Odometer::new(vec![2, 3]).collect();
        assert_eq!(combos.len(), 6);
        assert_eq!(combos[0], [0, 0]);
        assert_eq!(combos[1], [0, 1]);
        assert_eq!(combos[3], [1, 0]);
        assert_eq!(combos[5], [1, 2]);
    }

    #[test]
    fn matches_mixed_radix_decomposition() {
        let radices = [3, 1, 4, 2];
        for (flat, combo) in Odometer::new(radices.to_vec()).enumerate() {
            assert_eq!(combo, decompose(flat, &radices));
        }
    }

    #[test]
    fn degenerate_shapes() {
        assert_eq!(Odometer::new(vec![]).collect::<Vec<_>>(), vec![Vec::<usize>::new()]);
        assert_eq!(Odometer::new(vec![3, 0, 2]).count(), 0);
        assert_eq!(Odometer::new(vec![3, 0, 2]).combinations(), 0);
    }
}
