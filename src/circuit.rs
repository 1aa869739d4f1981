use std::error::Error;
use std::fmt::{self, Display};

use rand::{rngs::SmallRng, Rng, SeedableRng};

use crate::control_mask::ControlMask;
use crate::gate::{ContextKey, ContextProvider, ContextValue, Gate, InputRange, MAX_WIRE_COUNT};

/// One wire's slot in a column.
#[derive(Debug, Clone)]
pub enum Slot {
    Empty,
    /// Conditions every operation in the column on this wire reading
    /// `desired`.
    Control { desired: bool },
    /// One half of a two-wire swap.
    SwapHalf,
    Gate(Gate),
}

impl Slot {
    pub fn is_empty(&self) -> bool {
        matches!(self, Slot::Empty)
    }
}

/// Typed per-column side channel published by provider gates and consumed
/// by gates later in the same column. Append-only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnContext {
    entries: Vec<(ContextKey, ContextValue)>,
}

impl ColumnContext {
    pub fn get(&self, key: ContextKey) -> Option<ContextValue> {
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }

    pub fn insert(&mut self, key: ContextKey, value: ContextValue) {
        self.entries.push((key, value));
    }

    pub fn input_range(&self, key: ContextKey) -> Option<InputRange> {
        match self.get(key) {
            Some(ContextValue::Range(r)) => Some(r),
            _ => None,
        }
    }

    pub fn modulus(&self) -> Option<u64> {
        match self.get(ContextKey::Modulus) {
            Some(ContextValue::Constant(r)) => Some(r),
            _ => None,
        }
    }
}

/// One simultaneous slice of gates across all wires.
#[derive(Debug, Clone)]
pub struct GateColumn {
    slots: Vec<Slot>,
}

impl GateColumn {
    pub fn new(slots: Vec<Slot>) -> GateColumn {
        GateColumn { slots }
    }

    pub fn empty(wire_count: u32) -> GateColumn {
        GateColumn {
            slots: (0..wire_count).map(|_| Slot::Empty).collect(),
        }
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn wire_count(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Slot::is_empty)
    }

    /// The combined control mask contributed by this column's markers.
    pub fn controls(&self) -> ControlMask {
        let mut mask = ControlMask::NO_CONTROLS;
        for (wire, slot) in self.slots.iter().enumerate() {
            if let Slot::Control { desired } = slot {
                mask = mask
                    .combine(ControlMask::from_bit_is(wire as u32, *desired))
                    .expect("one slot per wire cannot contradict itself");
            }
        }
        mask
    }

    /// Wires carrying a swap-half marker, in order.
    pub fn swap_wires(&self) -> Vec<u32> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s, Slot::SwapHalf))
            .map(|(w, _)| w as u32)
            .collect()
    }

    /// The two swapped wires, or `None` unless exactly two halves are
    /// present. Validity is surfaced earlier as a disable reason.
    pub fn swap_pair(&self) -> Option<(u32, u32)> {
        match self.swap_wires().as_slice() {
            &[a, b] => Some((a, b)),
            _ => None,
        }
    }

    /// Context entries published by this column's provider gates.
    pub fn context(&self) -> ColumnContext {
        let mut ctx = ColumnContext::default();
        for (wire, slot) in self.slots.iter().enumerate() {
            let Slot::Gate(gate) = slot else { continue };
            match gate.context_provider {
                Some(ContextProvider::InputA) => ctx.insert(
                    ContextKey::InputA,
                    ContextValue::Range(InputRange {
                        offset: wire as u32,
                        length: gate.span,
                    }),
                ),
                Some(ContextProvider::InputB) => ctx.insert(
                    ContextKey::InputB,
                    ContextValue::Range(InputRange {
                        offset: wire as u32,
                        length: gate.span,
                    }),
                ),
                Some(ContextProvider::Modulus(r)) => {
                    ctx.insert(ContextKey::Modulus, ContextValue::Constant(r))
                }
                None => {}
            }
        }
        ctx
    }

    /// Per-wire reasons this column's occupants cannot run, or `None` for
    /// slots that are fine. Disabled gates are treated as absent during
    /// evaluation rather than failing it.
    pub fn disable_reasons(&self) -> Vec<Option<&'static str>> {
        let mut reasons = vec![None; self.slots.len()];
        let swaps = self.swap_wires();
        if swaps.len() == 1 {
            reasons[swaps[0] as usize] = Some("need other swap");
        } else if swaps.len() > 2 {
            for &w in &swaps {
                reasons[w as usize] = Some("too many swaps");
            }
        }
        let ctx = self.context();
        for (wire, slot) in self.slots.iter().enumerate() {
            let Slot::Gate(gate) = slot else { continue };
            for &key in gate.required_context {
                if ctx.get(key).is_none() {
                    reasons[wire] = Some(key.missing_reason());
                    break;
                }
            }
            if reasons[wire].is_none() && gate.required_context.contains(&ContextKey::Modulus) {
                if let Some(r) = ctx.modulus() {
                    if r > 1u64 << gate.span {
                        reasons[wire] = Some("modulus too large");
                    }
                }
            }
        }
        reasons
    }
}

/// An immutable circuit: a wire count and an ordered list of columns.
#[derive(Debug)]
pub struct CircuitDefinition {
    wire_count: u32,
    columns: Vec<GateColumn>,
}

impl CircuitDefinition {
    pub fn new(
        wire_count: u32,
        columns: Vec<GateColumn>,
    ) -> Result<CircuitDefinition, CircuitDefinitionError> {
        if wire_count == 0 || wire_count > MAX_WIRE_COUNT {
            return Err(CircuitDefinitionError::BadWireCount { wires: wire_count });
        }
        for (index, column) in columns.iter().enumerate() {
            if column.wire_count() != wire_count {
                return Err(CircuitDefinitionError::ColumnLengthMismatch {
                    column: index,
                    len: column.wire_count(),
                    wires: wire_count,
                });
            }
            for (wire, slot) in column.slots().iter().enumerate() {
                let Slot::Gate(gate) = slot else { continue };
                let row = wire as u32;
                if row + gate.span > wire_count {
                    return Err(CircuitDefinitionError::GateOverflow {
                        column: index,
                        row,
                        span: gate.span,
                        wires: wire_count,
                    });
                }
                for below in wire + 1..wire + gate.span as usize {
                    if !column.slots()[below].is_empty() {
                        return Err(CircuitDefinitionError::GateOverlap {
                            column: index,
                            row: below as u32,
                        });
                    }
                }
            }
        }
        Ok(CircuitDefinition {
            wire_count,
            columns,
        })
    }

    pub fn wire_count(&self) -> u32 {
        self.wire_count
    }

    pub fn columns(&self) -> &[GateColumn] {
        &self.columns
    }

    /// A copy with `column` appended.
    pub fn with_appended_column(
        &self,
        column: GateColumn,
    ) -> Result<CircuitDefinition, CircuitDefinitionError> {
        let mut columns = self.columns.clone();
        columns.push(column);
        CircuitDefinition::new(self.wire_count, columns)
    }

    /// A copy without the columns that hold nothing.
    pub fn with_empty_columns_dropped(&self) -> CircuitDefinition {
        CircuitDefinition {
            wire_count: self.wire_count,
            columns: self
                .columns
                .iter()
                .filter(|c| !c.is_empty())
                .cloned()
                .collect(),
        }
    }

    /// How long from any given time the whole circuit's outputs stay
    /// constant. Infinite when no gate depends on time.
    pub fn stable_duration(&self) -> f64 {
        self.columns
            .iter()
            .flat_map(|c| c.slots())
            .filter_map(|s| match s {
                Slot::Gate(g) => Some(g.stable_duration),
                _ => None,
            })
            .fold(f64::INFINITY, f64::min)
    }

    /// Disable reasons for every column, indexed `[column][wire]`.
    pub fn disable_reasons(&self) -> Vec<Vec<Option<&'static str>>> {
        self.columns.iter().map(GateColumn::disable_reasons).collect()
    }

    /// A random circuit of single-wire gates and controls, for benches and
    /// differential tests.
    pub fn random(wire_count: u32, columns: usize, seed: u64) -> CircuitDefinition {
        let mut rng = SmallRng::seed_from_u64(seed);
        let columns = (0..columns)
            .map(|_| {
                GateColumn::new(
                    (0..wire_count)
                        .map(|_| match rng.random_range(0..12) {
                            0 => Slot::Gate(Gate::x()),
                            1 => Slot::Gate(Gate::y()),
                            2 => Slot::Gate(Gate::z()),
                            3 => Slot::Gate(Gate::h()),
                            4 => Slot::Gate(Gate::s()),
                            5 => Slot::Gate(Gate::t()),
                            6 => Slot::Control {
                                desired: rng.random_range(0..2) == 0,
                            },
                            _ => Slot::Empty,
                        })
                        .collect(),
                )
            })
            .collect();
        CircuitDefinition::new(wire_count, columns)
            .expect("single-wire slots always form a valid circuit")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitDefinitionError {
    BadWireCount {
        wires: u32,
    },
    ColumnLengthMismatch {
        column: usize,
        len: u32,
        wires: u32,
    },
    /// A gate's span hangs off the bottom of the circuit.
    GateOverflow {
        column: usize,
        row: u32,
        span: u32,
        wires: u32,
    },
    /// A slot sits inside the span of a taller gate above it.
    GateOverlap {
        column: usize,
        row: u32,
    },
}

impl Display for CircuitDefinitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitDefinitionError::BadWireCount { wires } => {
                write!(f, "wire count {wires} is outside 1..={MAX_WIRE_COUNT}")
            }
            CircuitDefinitionError::ColumnLengthMismatch { column, len, wires } => {
                write!(
                    f,
                    "column {column} has {len} slots but the circuit has {wires} wires"
                )
            }
            CircuitDefinitionError::GateOverflow {
                column,
                row,
                span,
                wires,
            } => write!(
                f,
                "gate at column {column} row {row} spans {span} wires in a {wires}-wire circuit"
            ),
            CircuitDefinitionError::GateOverlap { column, row } => {
                write!(
                    f,
                    "slot at column {column} row {row} overlaps the gate above it"
                )
            }
        }
    }
}

impl Error for CircuitDefinitionError {}
