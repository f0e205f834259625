//! Typed register accessors: the channels × samples application buffer and
//! the [`NDRegisterAccessor`] interface layered on the transfer protocol.

pub mod async_accessor;
pub mod decorator;

use crate::{AccessModeFlags, Error, RegisterPath, TransferElement};
use num_traits::{Bounded, FromPrimitive, ToPrimitive};
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Arc, Mutex};

/// The closed set of element types an accessor can present to the
/// application.
///
/// Conversion between the raw transport type and the user type goes through
/// `f64` as the interchange (rounding to nearest and saturating for integral
/// targets).
pub trait UserType:
    Copy
    + Default
    + PartialEq
    + PartialOrd
    + fmt::Debug
    + fmt::Display
    + ToPrimitive
    + FromPrimitive
    + Bounded
    + Send
    + Sync
    + 'static
{
    /// The catalogue scalar type corresponding to this user type.
    const SCALAR_TYPE: device_access_catalogue::ScalarType;
    /// Whether the type is integral (conversions round) or floating point.
    const IS_INTEGRAL: bool;
}

macro_rules! impl_user_type {
    ($($ty:ty => $scalar:ident, $integral:expr;)*) => {
        $(
            impl UserType for $ty {
                const SCALAR_TYPE: device_access_catalogue::ScalarType =
                    device_access_catalogue::ScalarType::$scalar;
                const IS_INTEGRAL: bool = $integral;
            }
        )*
    };
}

impl_user_type! {
    i8 => Int8, true;
    u8 => UInt8, true;
    i16 => Int16, true;
    u16 => UInt16, true;
    i32 => Int32, true;
    u32 => UInt32, true;
    i64 => Int64, true;
    u64 => UInt64, true;
    f32 => Float32, false;
    f64 => Float64, false;
}

/// Converts a cooked numeric value into a user type value, rounding to
/// nearest and saturating for integral targets.
pub fn numeric_to_user_type<T: UserType>(value: f64) -> T {
    if !T::IS_INTEGRAL {
        return T::from_f64(value).unwrap_or_default();
    }
    let rounded = value.round();
    match T::from_f64(rounded) {
        Some(converted) => converted,
        None if rounded.is_nan() => T::default(),
        None if rounded < 0.0 => T::min_value(),
        None => T::max_value(),
    }
}

/// Converts a user type value into its cooked numeric form.
pub fn user_type_to_numeric<T: UserType>(value: T) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Dispatches a block of code over the concrete user type named by a
/// [`TypeId`] token. Used by backends to bridge from the type-erased
/// [`DeviceBackend`](crate::backend::DeviceBackend) interface into their
/// generic accessor factories.
macro_rules! with_user_type {
    ($token:expr, $alias:ident => $body:block else $fallback:block) => {
        with_user_type!(@dispatch $token, $alias, $body, $fallback,
            i8, u8, i16, u16, i32, u32, i64, u64, f32, f64)
    };
    (@dispatch $token:expr, $alias:ident, $body:block, $fallback:block, $($ty:ty),*) => {{
        let token: std::any::TypeId = $token;
        loop {
            $(
                if token == std::any::TypeId::of::<$ty>() {
                    type $alias = $ty;
                    let result = $body;
                    break result;
                }
            )*
            let result = $fallback;
            break result;
        }
    }};
}
pub(crate) use with_user_type;

/// The two-dimensional application buffer of an accessor, organised as
/// channels × samples per channel. Dimensions are fixed at construction.
#[derive(Clone, Debug, PartialEq)]
pub struct Buffer2D<T> {
    channels: Vec<Vec<T>>,
}

impl<T: Clone + Default> Buffer2D<T> {
    /// Creates a zero-initialised buffer with the given dimensions.
    pub fn new(channels: usize, samples: usize) -> Self {
        Self {
            channels: vec![vec![T::default(); samples]; channels],
        }
    }
}

impl<T> Buffer2D<T> {
    /// Creates a buffer from existing channel rows. All rows must have equal
    /// length.
    pub fn from_rows(channels: Vec<Vec<T>>) -> Self {
        debug_assert!(channels.windows(2).all(|w| w[0].len() == w[1].len()));
        Self { channels }
    }

    /// Number of channels.
    pub fn channels(&self) -> usize {
        self.channels.len()
    }

    /// Number of samples per channel.
    pub fn samples(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    /// The samples of one channel.
    pub fn channel(&self, channel: usize) -> &[T] {
        &self.channels[channel]
    }

    /// Mutable access to the samples of one channel. Swapping the `Vec` with
    /// another of equal length is the copy-free way decorators move data.
    pub fn channel_mut(&mut self, channel: usize) -> &mut Vec<T> {
        &mut self.channels[channel]
    }

    /// All channel rows.
    pub fn rows(&self) -> &[Vec<T>] {
        &self.channels
    }

    /// Swaps the channel contents with another buffer of identical shape.
    pub fn swap_with(&mut self, other: &mut Buffer2D<T>) {
        debug_assert_eq!(self.channels.len(), other.channels.len());
        for (mine, theirs) in self.channels.iter_mut().zip(other.channels.iter_mut()) {
            std::mem::swap(mine, theirs);
        }
    }
}

/// A typed register accessor: a [`TransferElement`] carrying a channels ×
/// samples application buffer of `T` values.
pub trait NDRegisterAccessor<T: UserType>: TransferElement {
    /// The application buffer.
    fn buffer(&self) -> &Buffer2D<T>;

    /// Mutable access to the application buffer. The runtime itself only
    /// mutates the buffer inside post stages; between post stages the buffer
    /// belongs to the application thread.
    fn buffer_mut(&mut self) -> &mut Buffer2D<T>;

    /// Number of channels, fixed at construction.
    fn number_of_channels(&self) -> usize {
        self.buffer().channels()
    }

    /// Number of samples per channel, fixed at construction.
    fn number_of_samples(&self) -> usize {
        self.buffer().samples()
    }

    /// Reads one buffer element in its cooked numeric form.
    fn get_as_cooked(&self, channel: usize, sample: usize) -> Result<f64, Error> {
        self.check_element(channel, sample)?;
        Ok(user_type_to_numeric(self.buffer().channel(channel)[sample]))
    }

    /// Sets one buffer element from its cooked numeric form.
    fn set_as_cooked(&mut self, channel: usize, sample: usize, value: f64) -> Result<(), Error> {
        self.check_element(channel, sample)?;
        self.buffer_mut().channel_mut(channel)[sample] = numeric_to_user_type(value);
        Ok(())
    }

    /// Bounds check helper for the cooked element access.
    fn check_element(&self, channel: usize, sample: usize) -> Result<(), Error> {
        if channel >= self.number_of_channels() || sample >= self.number_of_samples() {
            return Err(Error::logic(format!(
                "element ({channel}, {sample}) exceeds the shape of register '{}' ({} x {})",
                self.state().name,
                self.number_of_channels(),
                self.number_of_samples()
            )));
        }
        Ok(())
    }

    /// Walks to the innermost target of a decorator chain and splices the
    /// factory's replacement just above it. Non-decorators return `false`.
    fn replace_innermost_target(&mut self, _factory: &ReplacementFactory<T>) -> bool {
        false
    }
}

/// Factory used for deep decoration: receives the innermost target of a
/// decorator chain and optionally produces the element to splice in above
/// it.
pub type ReplacementFactory<T> = dyn Fn(&SharedAccessor<T>) -> Option<SharedAccessor<T>>;

/// A shareable handle to an accessor, used wherever several elements operate
/// on the same underlying accessor (decorators, transfer groups).
pub type SharedAccessor<T> = Arc<Mutex<Box<dyn NDRegisterAccessor<T> + Send>>>;

/// Wraps an owned accessor into the shareable handle form.
pub fn share<T: UserType>(accessor: Box<dyn NDRegisterAccessor<T> + Send>) -> SharedAccessor<T> {
    Arc::new(Mutex::new(accessor))
}

/// Typed convenience helpers available on every accessor.
pub trait NDRegisterAccessorExt<T: UserType>: NDRegisterAccessor<T> {
    /// The first sample of the first channel; convenient for scalars.
    fn value(&self) -> T {
        self.buffer().channel(0)[0]
    }

    /// Sets the first sample of the first channel.
    fn set_value(&mut self, value: T) {
        self.buffer_mut().channel_mut(0)[0] = value;
    }

    /// Replaces the samples of channel 0.
    fn set_channel(&mut self, samples: &[T]) {
        let channel = self.buffer_mut().channel_mut(0);
        assert_eq!(channel.len(), samples.len());
        channel.copy_from_slice(samples);
    }
}

impl<T: UserType, A: NDRegisterAccessor<T> + ?Sized> NDRegisterAccessorExt<T> for A {}

/// Identifies the data addressed by an accessor: path, user type, shape and
/// flags. Two accessors with equal descriptors address the same data; the
/// interrupt dispatcher uses this to share one synchronous accessor behind
/// many subscribers.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct AccessorDescriptor {
    /// The register path.
    pub path: RegisterPath,
    /// Type token of the user type.
    pub type_token: TypeId,
    /// Number of words addressed.
    pub number_of_words: usize,
    /// Word offset within the register.
    pub word_offset: usize,
    /// The access mode flags.
    pub flags: AccessModeFlags,
}

impl AccessorDescriptor {
    /// Creates the descriptor for an accessor of user type `T`.
    pub fn new<T: UserType>(
        path: RegisterPath,
        number_of_words: usize,
        word_offset: usize,
        flags: AccessModeFlags,
    ) -> Self {
        Self {
            path,
            type_token: TypeId::of::<T>(),
            number_of_words,
            word_offset,
            flags,
        }
    }
}

/// Recovers the typed accessor from the type-erased form returned by
/// [`DeviceBackend::get_register_accessor_erased`](crate::backend::DeviceBackend::get_register_accessor_erased).
pub(crate) fn downcast_accessor<T: UserType>(
    erased: Box<dyn Any + Send>,
) -> Result<Box<dyn NDRegisterAccessor<T> + Send>, Error> {
    erased
        .downcast::<Box<dyn NDRegisterAccessor<T> + Send>>()
        .map(|boxed| *boxed)
        .map_err(|_| {
            Error::logic("internal error: backend returned an accessor of the wrong user type")
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_shape() {
        let buffer: Buffer2D<i32> = Buffer2D::new(2, 3);
        assert_eq!(buffer.channels(), 2);
        assert_eq!(buffer.samples(), 3);
        assert!(buffer.rows().iter().all(|row| row.iter().all(|&v| v == 0)));
    }

    #[test]
    fn buffer_swap() {
        let mut a = Buffer2D::from_rows(vec![vec![1, 2]]);
        let mut b = Buffer2D::from_rows(vec![vec![3, 4]]);
        a.swap_with(&mut b);
        assert_eq!(a.channel(0), &[3, 4]);
        assert_eq!(b.channel(0), &[1, 2]);
    }

    #[test]
    fn numeric_conversion_rounds_and_saturates() {
        assert_eq!(numeric_to_user_type::<i32>(1.5), 2);
        assert_eq!(numeric_to_user_type::<i32>(-1.5), -2);
        assert_eq!(numeric_to_user_type::<u8>(300.0), u8::MAX);
        assert_eq!(numeric_to_user_type::<i8>(-300.0), i8::MIN);
        assert_eq!(numeric_to_user_type::<f64>(1.25), 1.25);
        assert_eq!(user_type_to_numeric(42u16), 42.0);
    }

    #[test]
    fn user_type_dispatch() {
        fn size_of_token(token: TypeId) -> Option<usize> {
            with_user_type!(token, T => {
                Some(std::mem::size_of::<T>())
            } else {
                None
            })
        }
        assert_eq!(size_of_token(TypeId::of::<u16>()), Some(2));
        assert_eq!(size_of_token(TypeId::of::<f64>()), Some(8));
        assert_eq!(size_of_token(TypeId::of::<String>()), None);
    }

    #[test]
    fn descriptor_ordering_distinguishes_types() {
        let a = AccessorDescriptor::new::<i32>(RegisterPath::new("R"), 1, 0, AccessModeFlags::empty());
        let b = AccessorDescriptor::new::<u32>(RegisterPath::new("R"), 1, 0, AccessModeFlags::empty());
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }
}
