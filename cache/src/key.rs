use std::fmt::Debug;
use std::hash::Hash;

/// The number of positional elements in a tuple.
///
/// Implemented for `()` and tuples of up to eight elements. Memoized calls
/// take their arguments as a tuple so that both the argument list and the
/// cache key carry a fixed, compile-time arity.
pub trait Arity {
  const ARITY: usize;
}

macro_rules! impl_arity {
  ($n:expr; $($t:ident),*) => {
    impl<$($t),*> Arity for ($($t,)*) {
      const ARITY: usize = $n;
    }
  };
}

impl_arity!(0;);
impl_arity!(1; A);
impl_arity!(2; A, B);
impl_arity!(3; A, B, C);
impl_arity!(4; A, B, C, D);
impl_arity!(5; A, B, C, D, E);
impl_arity!(6; A, B, C, D, E, F);
impl_arity!(7; A, B, C, D, E, F, G);
impl_arity!(8; A, B, C, D, E, F, G, H);

/// A cache key: a fixed-arity tuple compared and hashed by value.
pub trait CacheKey: Arity + Clone + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Arity + Clone + Eq + Hash + Debug + Send + Sync + 'static {}
