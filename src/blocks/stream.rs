//! Stream processing blocks
//!
//! One block per rate kind: [`AddConst`], [`Head`] and [`TagForwarder`] are
//! sync, [`KeepOneInN`] decimates, [`Repeat`] interpolates, and [`KeepMInN`]
//! has a general rate with its own forecast. [`MovingSum`] uses history.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::ops::Add;

use tracing::debug;

use crate::runtime::block::{Block, WorkStatus};
use crate::runtime::errors::{ConfigError, WorkError, WorkResult};
use crate::runtime::pmt::{Pmt, Symbol};
use crate::runtime::ports::{IoSignature, Item};
use crate::runtime::rate::Rate;
use crate::runtime::tag::Tag;
use crate::runtime::work_io::WorkIo;

/// Numeric item that can be set from a [`Pmt`] parameter value
pub trait Scalar: Item + Add<Output = Self> {
    fn from_pmt(value: &Pmt) -> Option<Self>;
}

macro_rules! integer_scalar {
    ($($t:ty),*) => {
        $(
            impl Scalar for $t {
                fn from_pmt(value: &Pmt) -> Option<Self> {
                    match value {
                        Pmt::U64(v) => <$t>::try_from(*v).ok(),
                        other => other.as_long().and_then(|v| <$t>::try_from(v).ok()),
                    }
                }
            }
        )*
    };
}

macro_rules! float_scalar {
    ($($t:ty),*) => {
        $(
            impl Scalar for $t {
                fn from_pmt(value: &Pmt) -> Option<Self> {
                    value.as_double().map(|v| v as $t)
                }
            }
        )*
    };
}

integer_scalar!(i8, i16, i32, i64, u8, u16, u32, u64);
float_scalar!(f32, f64);

fn invalid(block: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidParameter {
        block,
        reason: reason.into(),
    }
}

/// Adds a constant to every item; the constant is the `constant` parameter
pub struct AddConst<T: Scalar> {
    name: String,
    constant: T,
}

impl<T: Scalar> AddConst<T> {
    pub fn new(constant: T) -> Self {
        Self {
            name: "add_const".to_string(),
            constant,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T: Scalar> Block for AddConst<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_signature(&self) -> IoSignature {
        IoSignature::single::<T>()
    }

    fn output_signature(&self) -> IoSignature {
        IoSignature::single::<T>()
    }

    fn set_parameter(&mut self, name: &str, value: &Pmt) -> WorkResult {
        if name != "constant" {
            return Err(WorkError::UnknownParameter(name.to_string()));
        }
        self.constant = T::from_pmt(value).ok_or_else(|| WorkError::InvalidParameter {
            name: name.to_string(),
            reason: format!("{:?} is not a {}", value, std::any::type_name::<T>()),
        })?;
        Ok(())
    }

    fn work(&mut self, io: &mut WorkIo) -> WorkResult<WorkStatus> {
        let n = io.outputs.noutput_items();
        let input = io.inputs.slice::<T>(0)?;
        let out = io.outputs.slice_mut::<T>(0)?;
        for (o, &i) in out.iter_mut().zip(&input[..n]) {
            *o = i + self.constant;
        }
        Ok(WorkStatus::Produced(n))
    }
}

/// Passes the first `limit` items, then reports done
pub struct Head<T: Item> {
    name: String,
    limit: u64,
    copied: u64,
    _item: PhantomData<T>,
}

impl<T: Item> Head<T> {
    pub fn new(limit: u64) -> Self {
        Self {
            name: "head".to_string(),
            limit,
            copied: 0,
            _item: PhantomData,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T: Item> Block for Head<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_signature(&self) -> IoSignature {
        IoSignature::single::<T>()
    }

    fn output_signature(&self) -> IoSignature {
        IoSignature::single::<T>()
    }

    fn work(&mut self, io: &mut WorkIo) -> WorkResult<WorkStatus> {
        let remaining = self.limit - self.copied;
        let n = (io.outputs.noutput_items() as u64).min(remaining) as usize;
        let input = io.inputs.slice::<T>(0)?;
        io.outputs.slice_mut::<T>(0)?[..n].copy_from_slice(&input[..n]);
        io.inputs.consume(0, n);
        io.outputs.produce(0, n);
        self.copied += n as u64;

        if self.copied == self.limit {
            debug!("[{}] Passed {} items", self.name, self.limit);
            return Ok(WorkStatus::Done);
        }
        Ok(WorkStatus::Ok)
    }
}

/// Decimator keeping the first item of every `n`
pub struct KeepOneInN<T: Item> {
    name: String,
    n: usize,
    _item: PhantomData<T>,
}

impl<T: Item> KeepOneInN<T> {
    pub fn new(n: usize) -> Result<Self, ConfigError> {
        if n == 0 {
            return Err(invalid("keep_one_in_n", "n must be at least 1"));
        }
        Ok(Self {
            name: "keep_one_in_n".to_string(),
            n,
            _item: PhantomData,
        })
    }
}

impl<T: Item> Block for KeepOneInN<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_signature(&self) -> IoSignature {
        IoSignature::single::<T>()
    }

    fn output_signature(&self) -> IoSignature {
        IoSignature::single::<T>()
    }

    fn rate(&self) -> Rate {
        Rate::decimating(self.n)
    }

    fn work(&mut self, io: &mut WorkIo) -> WorkResult<WorkStatus> {
        let n = io.outputs.noutput_items();
        let input = io.inputs.slice::<T>(0)?;
        let out = io.outputs.slice_mut::<T>(0)?;
        for (o, &i) in out.iter_mut().zip(input.iter().step_by(self.n)) {
            *o = i;
        }
        Ok(WorkStatus::Produced(n))
    }
}

/// Interpolator repeating every item `n` times
pub struct Repeat<T: Item> {
    name: String,
    n: usize,
    _item: PhantomData<T>,
}

impl<T: Item> Repeat<T> {
    pub fn new(n: usize) -> Result<Self, ConfigError> {
        if n == 0 {
            return Err(invalid("repeat", "n must be at least 1"));
        }
        Ok(Self {
            name: "repeat".to_string(),
            n,
            _item: PhantomData,
        })
    }
}

impl<T: Item> Block for Repeat<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_signature(&self) -> IoSignature {
        IoSignature::single::<T>()
    }

    fn output_signature(&self) -> IoSignature {
        IoSignature::single::<T>()
    }

    fn rate(&self) -> Rate {
        Rate::interpolating(self.n)
    }

    fn work(&mut self, io: &mut WorkIo) -> WorkResult<WorkStatus> {
        let n = io.outputs.noutput_items();
        let input = io.inputs.slice::<T>(0)?;
        let out = io.outputs.slice_mut::<T>(0)?;
        for (chunk, &i) in out.chunks_mut(self.n).zip(input) {
            chunk.fill(i);
        }
        Ok(WorkStatus::Produced(n))
    }
}

/// Keeps the first `m` items of every `n`.
///
/// General-rate block: the output comes in groups of `m` and each group needs
/// a full group of `n` inputs, which its forecast reports.
pub struct KeepMInN<T: Item> {
    name: String,
    m: usize,
    n: usize,
    _item: PhantomData<T>,
}

impl<T: Item> KeepMInN<T> {
    pub fn new(m: usize, n: usize) -> Result<Self, ConfigError> {
        if m == 0 || n < m {
            return Err(invalid(
                "keep_m_in_n",
                format!("need 1 <= m <= n, got m={} n={}", m, n),
            ));
        }
        Ok(Self {
            name: "keep_m_in_n".to_string(),
            m,
            n,
            _item: PhantomData,
        })
    }
}

impl<T: Item> Block for KeepMInN<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_signature(&self) -> IoSignature {
        IoSignature::single::<T>()
    }

    fn output_signature(&self) -> IoSignature {
        IoSignature::single::<T>()
    }

    fn rate(&self) -> Rate {
        Rate::General {
            relative_rate: self.m as f64 / self.n as f64,
        }
    }

    fn output_multiple(&self) -> usize {
        self.m
    }

    fn forecast(&self, noutput: usize, required: &mut [usize]) {
        required.fill(noutput.div_ceil(self.m) * self.n);
    }

    fn work(&mut self, io: &mut WorkIo) -> WorkResult<WorkStatus> {
        let groups = (io.outputs.noutput_items() / self.m).min(io.inputs.ninput_items(0) / self.n);
        let input = io.inputs.slice::<T>(0)?;
        let out = io.outputs.slice_mut::<T>(0)?;
        for (o, i) in out
            .chunks_exact_mut(self.m)
            .zip(input.chunks_exact(self.n))
            .take(groups)
        {
            o.copy_from_slice(&i[..self.m]);
        }
        io.inputs.consume(0, groups * self.n);
        io.outputs.produce(0, groups * self.m);
        Ok(WorkStatus::Ok)
    }
}

/// Sum over a sliding window of `length` items.
///
/// The window is the block's history, so the first outputs see zero items
/// before the stream start. `length` is a runtime parameter up to
/// `max_length`.
pub struct MovingSum<T: Scalar> {
    name: String,
    length: usize,
    max_length: usize,
    _item: PhantomData<T>,
}

impl<T: Scalar> MovingSum<T> {
    pub fn new(length: usize, max_length: usize) -> Result<Self, ConfigError> {
        if length == 0 || max_length < length {
            return Err(invalid(
                "moving_sum",
                format!("need 1 <= length <= max_length, got {} and {}", length, max_length),
            ));
        }
        Ok(Self {
            name: "moving_sum".to_string(),
            length,
            max_length,
            _item: PhantomData,
        })
    }
}

impl<T: Scalar> Block for MovingSum<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_signature(&self) -> IoSignature {
        IoSignature::single::<T>()
    }

    fn output_signature(&self) -> IoSignature {
        IoSignature::single::<T>()
    }

    fn history(&self) -> usize {
        self.length
    }

    fn max_history(&self) -> usize {
        self.max_length
    }

    fn set_parameter(&mut self, name: &str, value: &Pmt) -> WorkResult {
        if name != "length" {
            return Err(WorkError::UnknownParameter(name.to_string()));
        }
        match value.as_u64().map(|v| v as usize) {
            Some(length) if (1..=self.max_length).contains(&length) => {
                self.length = length;
                Ok(())
            }
            _ => Err(WorkError::InvalidParameter {
                name: name.to_string(),
                reason: format!("{:?} is outside 1..={}", value, self.max_length),
            }),
        }
    }

    fn work(&mut self, io: &mut WorkIo) -> WorkResult<WorkStatus> {
        let n = io.outputs.noutput_items();
        let input = io.inputs.slice::<T>(0)?;
        let length = io.inputs.history(0);
        let out = io.outputs.slice_mut::<T>(0)?;
        for (o, window) in out.iter_mut().zip(input.windows(length)) {
            *o = window.iter().fold(T::default(), |acc, &x| acc + x);
        }
        Ok(WorkStatus::Produced(n))
    }
}

/// Sync pass-through publishing every tag it sees on the `tags` message port.
///
/// Messages are dicts with `offset`, `key`, `value` and, when known, `srcid`.
pub struct TagForwarder<T: Item> {
    name: String,
    _item: PhantomData<T>,
}

impl<T: Item> TagForwarder<T> {
    pub fn new() -> Self {
        Self {
            name: "tag_forwarder".to_string(),
            _item: PhantomData,
        }
    }

    fn to_message(tag: Tag) -> Pmt {
        let mut dict = BTreeMap::new();
        dict.insert(Symbol::new("offset"), Pmt::U64(tag.offset));
        dict.insert(Symbol::new("key"), Pmt::Symbol(tag.key));
        dict.insert(Symbol::new("value"), tag.value);
        if let Some(srcid) = tag.srcid {
            dict.insert(Symbol::new("srcid"), Pmt::Symbol(srcid));
        }
        Pmt::Dict(dict)
    }
}

impl<T: Item> Default for TagForwarder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Item> Block for TagForwarder<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_signature(&self) -> IoSignature {
        IoSignature::single::<T>()
    }

    fn output_signature(&self) -> IoSignature {
        IoSignature::single::<T>()
    }

    fn message_outputs(&self) -> Vec<Symbol> {
        vec![Symbol::new("tags")]
    }

    fn work(&mut self, io: &mut WorkIo) -> WorkResult<WorkStatus> {
        let n = io.outputs.noutput_items();
        let input = io.inputs.slice::<T>(0)?;
        io.outputs.slice_mut::<T>(0)?.copy_from_slice(&input[..n]);
        for tag in io.inputs.tags_in_window(0, 0, n) {
            io.messages.post("tags", Self::to_message(tag));
        }
        Ok(WorkStatus::Produced(n))
    }
}
