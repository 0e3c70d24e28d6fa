use chumsky::prelude::*;
use miette::*;
use num::rational::Ratio;
use num::{One, Zero};
use rayon::prelude::*;
use thiserror::Error;

/// Exact rational scalar for the elimination; always stored in lowest terms
/// with a positive denominator.
type Frac = Ratio<i64>;

// -----------------------------------------------------------------------------
// Constants & Configuration
// -----------------------------------------------------------------------------

/// Numerical epsilon for the floating-point bound arithmetic. Feasibility of
/// a candidate assignment is never decided with floats, only the search
/// bounds are.
const EPSILON: f64 = 1e-9;

// -----------------------------------------------------------------------------
// Domain Models
// -----------------------------------------------------------------------------

#[derive(Debug)]
struct MachineRaw {
    buttons: Vec<Vec<usize>>,
    targets: Vec<i64>,
}

#[derive(Debug)]
struct Machine {
    /// Per button, the counters it increments by one each press.
    buttons: Vec<Vec<usize>>,
    /// Required final value of every counter.
    targets: Vec<i64>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SolveError {
    /// The counter equations contradict each other over the rationals.
    #[error("counter equations are inconsistent, no press counts can satisfy them")]
    InconsistentSystem,
    /// The system is solvable over the rationals but not with non-negative
    /// integer press counts.
    #[error("no non-negative integer press counts reach the targets")]
    NoSolution,
}

impl Machine {
    fn new(raw: MachineRaw) -> Result<Self> {
        let counters = raw.targets.len();
        for (b, indices) in raw.buttons.iter().enumerate() {
            if let Some(&bad) = indices.iter().find(|&&i| i >= counters) {
                bail!("button {b} increments counter {bad}, but only {counters} counters exist");
            }
        }
        Ok(Self {
            buttons: raw.buttons,
            targets: raw.targets,
        })
    }

    /// Minimum total number of presses (non-negative integers, any button any
    /// number of times) that drives every counter to exactly its target.
    fn min_presses(&self) -> Result<u64, SolveError> {
        let mut system = LinearSystem::new(self);
        system.rref()?;

        if system.free_cols.is_empty() {
            return system.unique_total();
        }

        // No press count in a feasible solution can exceed the largest
        // target, since every press raises some counter by one.
        let ceiling = self.targets.iter().copied().max().unwrap_or(0);
        Search::new(&system, ceiling).run()
    }
}

// -----------------------------------------------------------------------------
// Exact Rational Elimination
// -----------------------------------------------------------------------------

struct LinearSystem {
    /// Augmented matrix [A | b]; row per counter, column per button plus the
    /// trailing target column.
    aug: Vec<Vec<Frac>>,
    num_buttons: usize,
    /// pivot_cols[r] = column resolved by pivot row r.
    pivot_cols: Vec<usize>,
    /// Columns that never produced a pivot.
    free_cols: Vec<usize>,
}

impl LinearSystem {
    fn new(machine: &Machine) -> Self {
        let num_buttons = machine.buttons.len();
        let mut aug = vec![vec![Frac::zero(); num_buttons + 1]; machine.targets.len()];

        for (col, indices) in machine.buttons.iter().enumerate() {
            for &row in indices {
                aug[row][col] = Frac::one();
            }
        }
        for (row, &target) in machine.targets.iter().enumerate() {
            aug[row][num_buttons] = Frac::from_integer(target);
        }

        Self {
            aug,
            num_buttons,
            pivot_cols: Vec::new(),
            free_cols: Vec::new(),
        }
    }

    /// Gaussian elimination to Reduced Row Echelon Form. Rows above the pivot
    /// are eliminated too, so afterwards every pivot variable reads as
    /// `rhs - sum(coeff * free_var)` straight off its row.
    fn rref(&mut self) -> Result<(), SolveError> {
        let rows = self.aug.len();
        let rhs = self.num_buttons;
        let mut pivot_row = 0;

        for col in 0..self.num_buttons {
            if pivot_row >= rows {
                self.free_cols.push(col);
                continue;
            }

            let Some(src) = (pivot_row..rows).find(|&r| !self.aug[r][col].is_zero()) else {
                self.free_cols.push(col);
                continue;
            };
            self.aug.swap(pivot_row, src);

            let pivot = self.aug[pivot_row][col];
            for j in 0..=rhs {
                self.aug[pivot_row][j] = self.aug[pivot_row][j] / pivot;
            }

            for r in 0..rows {
                if r == pivot_row || self.aug[r][col].is_zero() {
                    continue;
                }
                let factor = self.aug[r][col];
                for j in 0..=rhs {
                    let scaled = factor * self.aug[pivot_row][j];
                    self.aug[r][j] = self.aug[r][j] - scaled;
                }
            }

            self.pivot_cols.push(col);
            pivot_row += 1;
        }

        // A zeroed-out row demanding a nonzero target is a contradiction.
        for r in pivot_row..rows {
            if !self.aug[r][rhs].is_zero() {
                return Err(SolveError::InconsistentSystem);
            }
        }

        Ok(())
    }

    /// With no free columns the pivot rows are the whole solution; it must be
    /// made of non-negative integers to count as press counts.
    fn unique_total(&self) -> Result<u64, SolveError> {
        let rhs = self.num_buttons;
        let mut total = 0u64;
        for row in 0..self.pivot_cols.len() {
            let value = self.aug[row][rhs];
            if value < Frac::zero() || !value.is_integer() {
                return Err(SolveError::NoSolution);
            }
            total += value.to_integer() as u64;
        }
        Ok(total)
    }
}

// -----------------------------------------------------------------------------
// Bounded Free-Variable Search
// -----------------------------------------------------------------------------

/// Depth-first enumeration of integer assignments to the free variables.
///
/// Bounds per level come from the non-negativity of every pivot formula;
/// they are computed in floats for speed, while the leaf feasibility check
/// re-evaluates the pivot values with exact rationals.
struct Search<'a> {
    system: &'a LinearSystem,
    /// coeffs[r][f]: float mirror of pivot row r's coefficient on free
    /// variable f.
    coeffs: Vec<Vec<f64>>,
    /// Per pivot row, rhs minus the contributions assigned so far.
    remaining: Vec<f64>,
    assigned: Vec<i64>,
    ceiling: i64,
    best: Option<u64>,
}

impl<'a> Search<'a> {
    fn new(system: &'a LinearSystem, ceiling: i64) -> Self {
        let rhs = system.num_buttons;
        let rank = system.pivot_cols.len();

        let coeffs = (0..rank)
            .map(|r| {
                system
                    .free_cols
                    .iter()
                    .map(|&f| approx(system.aug[r][f]))
                    .collect()
            })
            .collect();
        let remaining = (0..rank).map(|r| approx(system.aug[r][rhs])).collect();

        Self {
            system,
            coeffs,
            remaining,
            assigned: vec![0; system.free_cols.len()],
            ceiling,
            best: None,
        }
    }

    fn run(mut self) -> Result<u64, SolveError> {
        self.descend(0, 0);
        self.best.ok_or(SolveError::NoSolution)
    }

    fn descend(&mut self, level: usize, free_sum: u64) {
        if self.best.is_some_and(|b| free_sum >= b) {
            return;
        }

        if level == self.assigned.len() {
            if let Some(pivot_sum) = self.exact_pivot_sum() {
                let total = free_sum + pivot_sum;
                if self.best.is_none_or(|b| total < b) {
                    self.best = Some(total);
                }
            }
            return;
        }

        let (lower, upper) = self.bounds(level);
        for value in lower..=upper {
            self.assigned[level] = value;
            for r in 0..self.remaining.len() {
                self.remaining[r] -= self.coeffs[r][level] * value as f64;
            }
            self.descend(level + 1, free_sum + value as u64);
            for r in 0..self.remaining.len() {
                self.remaining[r] += self.coeffs[r][level] * value as f64;
            }
        }
    }

    /// Integer range the current free variable can take without forcing some
    /// pivot variable negative, assuming the not-yet-assigned variables do
    /// their utmost to relax each row.
    fn bounds(&self, level: usize) -> (i64, i64) {
        let mut lower = 0i64;
        let mut upper = self.ceiling;

        for (r, row_coeffs) in self.coeffs.iter().enumerate() {
            let c = row_coeffs[level];

            // Later variables with negative coefficients can still raise this
            // row's slack, by at most the ceiling each.
            let future_relief: f64 = row_coeffs[level + 1..]
                .iter()
                .filter(|&&fc| fc < -EPSILON)
                .map(|&fc| -fc * self.ceiling as f64)
                .sum();
            let slack = self.remaining[r] + future_relief;

            if c > EPSILON {
                upper = upper.min((slack / c + EPSILON).floor() as i64);
            } else if c < -EPSILON && slack < -EPSILON {
                lower = lower.max((-slack / -c - EPSILON).ceil() as i64);
            }
        }

        (lower, upper)
    }

    /// Exact evaluation of every pivot variable under the current complete
    /// assignment. `None` unless all of them are non-negative integers.
    fn exact_pivot_sum(&self) -> Option<u64> {
        let rhs = self.system.num_buttons;
        let mut sum = 0u64;

        for row in 0..self.system.pivot_cols.len() {
            let mut value = self.system.aug[row][rhs];
            for (f, &col) in self.system.free_cols.iter().enumerate() {
                if self.assigned[f] != 0 {
                    value = value - self.system.aug[row][col] * Frac::from_integer(self.assigned[f]);
                }
            }
            if value < Frac::zero() || !value.is_integer() {
                return None;
            }
            sum += value.to_integer() as u64;
        }

        Some(sum)
    }
}

fn approx(value: Frac) -> f64 {
    *value.numer() as f64 / *value.denom() as f64
}

// -----------------------------------------------------------------------------
// Parsing & Entry Point
// -----------------------------------------------------------------------------

fn parser<'a>() -> impl Parser<'a, &'a str, Vec<MachineRaw>, extra::Err<Rich<'a, char>>> {
    let hspace = one_of(" \t").repeated();

    // [.##.] (Ignored by this part)
    let diagram = none_of("]")
        .repeated()
        .delimited_by(just('['), just(']'))
        .ignored();

    // (0,2,3)
    let indices = text::int(10)
        .from_str::<usize>()
        .unwrapped()
        .separated_by(just(','))
        .collect::<Vec<usize>>()
        .delimited_by(just('('), just(')'));

    let buttons = indices.padded_by(hspace).repeated().collect::<Vec<_>>();

    // {7,5,12}
    let targets = text::int(10)
        .from_str::<i64>()
        .unwrapped()
        .separated_by(just(','))
        .collect::<Vec<i64>>()
        .delimited_by(just('{'), just('}'));

    let machine = diagram
        .then_ignore(hspace)
        .ignore_then(buttons)
        .then(targets)
        .map(|(buttons, targets)| MachineRaw { buttons, targets });

    machine
        .separated_by(text::newline())
        .allow_trailing()
        .collect()
}

#[tracing::instrument]
pub fn process(input: &str) -> Result<String> {
    let machines = parser()
        .parse(input)
        .into_result()
        .map_err(|e| miette!("Parse failed: {:?}", e))?
        .into_iter()
        .map(Machine::new)
        .collect::<Result<Vec<_>>>()?;

    let total: u64 = machines
        .par_iter()
        .map(|machine| machine.min_presses())
        .sum::<Result<u64, SolveError>>()
        .into_diagnostic()?;

    Ok(total.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    use itertools::Itertools;
    use rstest::rstest;

    fn machine(line: &str) -> Machine {
        let mut raw = parser().parse(line).into_result().expect("parse failed");
        assert_eq!(raw.len(), 1);
        Machine::new(raw.pop().unwrap()).expect("invalid machine")
    }

    /// Exhaustive press-count oracle: every button capped at the largest
    /// target, every combination checked against the counters.
    fn brute_force(machine: &Machine) -> Option<u64> {
        let cap = machine.targets.iter().copied().max().unwrap_or(0);
        (0..machine.buttons.len())
            .map(|_| 0..=cap)
            .multi_cartesian_product()
            .filter(|presses| {
                let mut counters = vec![0i64; machine.targets.len()];
                for (indices, &n) in machine.buttons.iter().zip(presses.iter()) {
                    for &c in indices {
                        counters[c] += n;
                    }
                }
                counters == machine.targets
            })
            .map(|presses| presses.iter().sum::<i64>() as u64)
            .min()
    }

    #[rstest]
    #[case("[.##.] (3) (1,3) (2) (2,3) (0,2) (0,1) {3,5,4,7}", 10)]
    #[case("[...#.] (0,2,3,4) (2,3) (0,4) (0,1,2) (1,2,3,4) {7,5,12,7,2}", 12)]
    #[case("[.###.#] (0,1,2,3,4) (0,3,4) (0,1,2,4,5) (1,2) {10,11,11,5,10,5}", 11)]
    fn single_machines(#[case] line: &str, #[case] expected: u64) {
        assert_eq!(machine(line).min_presses(), Ok(expected));
    }

    #[test]
    fn agrees_with_exhaustive_search() {
        let lines = [
            "[..] (0) (0,1) (1) {3,5}",
            "[..] (0) (1) {2,3}",
            "[...] (0,2) (0,1) (1,2) {2,2,2}",
            "[...] (0,1) (1,2) (0,2) (1) {4,5,3}",
            "[..] (0,1) (0,1) {4,4}",
        ];
        for line in lines {
            let machine = machine(line);
            assert_eq!(machine.min_presses().ok(), brute_force(&machine), "line: {line}");
        }
    }

    #[test]
    fn shared_button_with_unequal_targets_is_inconsistent() {
        let machine = machine("[..] (0,1) {1,2}");
        assert_eq!(machine.min_presses(), Err(SolveError::InconsistentSystem));
    }

    #[test]
    fn fractional_unique_solution_is_rejected() {
        // The only rational solution is (1/2, 1/2, 1/2).
        let machine = machine("[...] (0,2) (0,1) (1,2) {1,1,1}");
        assert_eq!(machine.min_presses(), Err(SolveError::NoSolution));
    }

    #[test]
    fn negative_unique_solution_is_rejected() {
        // Forces one press count to -1.
        let machine = machine("[...] (0,2) (0,1) (1,2) {0,0,2}");
        assert_eq!(machine.min_presses(), Err(SolveError::NoSolution));
    }

    #[test]
    fn free_variable_with_forced_lower_bound() {
        // x2 must be at least 2 before x0 = x2 - 2 becomes non-negative.
        let machine = machine("[..] (0) (0,1) (1) {3,5}");
        assert_eq!(machine.min_presses(), Ok(5));
    }

    #[test]
    fn solving_twice_gives_the_same_answer() {
        let machine = machine("[...#.] (0,2,3,4) (2,3) (0,4) (0,1,2) (1,2,3,4) {7,5,12,7,2}");
        assert_eq!(machine.min_presses(), machine.min_presses());
    }

    #[test]
    fn it_works() -> Result<()> {
        let input = "[.##.] (3) (1,3) (2) (2,3) (0,2) (0,1) {3,5,4,7}
[...#.] (0,2,3,4) (2,3) (0,4) (0,1,2) (1,2,3,4) {7,5,12,7,2}
[.###.#] (0,1,2,3,4) (0,3,4) (0,1,2,4,5) (1,2) {10,11,11,5,10,5}";
        assert_eq!("33", process(input)?);
        Ok(())
    }
}
