use chumsky::prelude::*;
use miette::*;
use rustc_hash::FxHashMap;

/// Masks live in a fixed-width word; banks wider than this are rejected
/// at construction instead of silently losing bits.
const MAX_LIGHTS: usize = u32::BITS as usize;

#[derive(Debug)]
struct MachineRaw {
    lights: Vec<bool>,
    buttons: Vec<Vec<usize>>,
}

#[derive(Debug)]
struct Machine {
    /// Target light pattern; bit i is light i.
    target: u32,
    /// One toggle mask per button.
    buttons: Vec<u32>,
}

impl Machine {
    fn new(raw: MachineRaw) -> Result<Self> {
        let width = raw.lights.len();
        if width > MAX_LIGHTS {
            bail!("bank has {width} lights, at most {MAX_LIGHTS} are supported");
        }

        let target = raw
            .lights
            .iter()
            .enumerate()
            .filter(|(_, lit)| **lit)
            .fold(0u32, |mask, (i, _)| mask | 1 << i);

        let buttons = raw
            .buttons
            .into_iter()
            .map(|indices| {
                indices.into_iter().try_fold(0u32, |mask, i| {
                    if i >= width {
                        bail!("button toggles light {i}, but the bank only has {width}");
                    }
                    Ok(mask | 1 << i)
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { target, buttons })
    }

    /// Fewest button presses whose combined toggles produce exactly the
    /// target pattern, or `None` if no subset of buttons does.
    ///
    /// Meet in the middle: enumerate the subsets of each half of the button
    /// list separately and join them through a lookup table, so a 20-button
    /// machine costs ~2*2^10 subsets instead of 2^20.
    fn min_presses(&self) -> Option<u32> {
        let (front, back) = self.buttons.split_at(self.buttons.len() / 2);

        // Per distinct XOR of the front half, the cheapest subset reaching it.
        let mut cheapest_front: FxHashMap<u32, u32> = FxHashMap::default();
        for subset in 0usize..1 << front.len() {
            let mut acc = 0u32;
            for (i, &button) in front.iter().enumerate() {
                if subset & (1 << i) != 0 {
                    acc ^= button;
                }
            }
            let presses = subset.count_ones();
            let entry = cheapest_front.entry(acc).or_insert(presses);
            if presses < *entry {
                *entry = presses;
            }
        }

        let mut best = None;
        for subset in 0usize..1 << back.len() {
            let mut acc = 0u32;
            for (i, &button) in back.iter().enumerate() {
                if subset & (1 << i) != 0 {
                    acc ^= button;
                }
            }
            if let Some(&front_presses) = cheapest_front.get(&(self.target ^ acc)) {
                let total = subset.count_ones() + front_presses;
                if best.is_none_or(|b| total < b) {
                    best = Some(total);
                }
            }
        }

        best
    }
}

fn parser<'a>() -> impl Parser<'a, &'a str, Vec<MachineRaw>, extra::Err<Rich<'a, char>>> {
    // Custom whitespace parser that excludes newlines
    let hspace = any().filter(|c: &char| *c == ' ' || *c == '\t').repeated();

    let light = choice((just('.').to(false), just('#').to(true)));

    // [.##.]
    let diagram = light
        .repeated()
        .collect::<Vec<bool>>()
        .delimited_by(just('['), just(']'));

    // (0,2,3)
    let indices = text::int(10)
        .from_str::<usize>()
        .unwrapped()
        .separated_by(just(','))
        .collect::<Vec<usize>>()
        .delimited_by(just('('), just(')'));

    // (0,2) (1,3) ...
    let buttons = indices.padded_by(hspace).repeated().collect::<Vec<_>>();

    // {3,5,4} (Ignored by this part)
    let joltage = none_of("}")
        .repeated()
        .delimited_by(just('{'), just('}'))
        .ignored();

    let machine = diagram
        .then_ignore(hspace)
        .then(buttons)
        .then_ignore(joltage.or_not().padded_by(hspace))
        .map(|(lights, buttons)| MachineRaw { lights, buttons });

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

    let total_presses = machines.iter().try_fold(0u64, |acc, machine| {
        let presses = machine
            .min_presses()
            .ok_or_else(|| miette!("no combination of button presses lights the target"))?;
        Ok::<_, Report>(acc + u64::from(presses))
    })?;

    Ok(total_presses.to_string())
}
