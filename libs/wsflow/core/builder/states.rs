/// Type-state markers for the builder pattern
///
/// These types track at compile time whether an adapter has been supplied,
/// so a connection can never be spawned without one.

use std::marker::PhantomData;

/// Marker trait for adapter state
pub trait AdapterState {
    /// What the builder stores in the adapter slot
    type Adapter;
}

/// Adapter has not been set
pub struct NoAdapter;
impl AdapterState for NoAdapter {
    type Adapter = ();
}

/// Adapter has been set
pub struct HasAdapter<A>(PhantomData<A>);
impl<A> AdapterState for HasAdapter<A> {
    type Adapter = A;
}

/// Phantom marker to prevent direct construction
#[derive(Debug, Clone, Copy)]
pub struct TypeState<S> {
    _adapter: PhantomData<S>,
}

impl<S> TypeState<S> {
    pub(crate) fn new() -> Self {
        Self {
            _adapter: PhantomData,
        }
    }
}

impl<S> Default for TypeState<S> {
    fn default() -> Self {
        Self::new()
    }
}
