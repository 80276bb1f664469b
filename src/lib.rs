/// Open a profiling span that closes when the returned value is dropped.
/// Does nothing unless the `tracy` feature is enabled and a profiler is connected.
macro_rules! tracy_span {
    ($name:literal, $fn_name:literal) => {
        tracy_client::Client::running()
            .map(|client| client.span_alloc(Some($name), $fn_name, file!(), line!(), 0))
    };
}

pub mod math;
pub use math::{uv, Pose, Rotor3, Unit, Vec3};

pub mod physics;
pub use physics::{
    collision::{self, BalanceStrategy, IndexRayHit, IndexStats, Intersection, Ray},
    contact_graph::{ContactEdge, ContactGraph, ContactParams, PairKey},
    interaction::{self, Gravity, Interaction, Spring},
    BodyKind, Entity, EntityBuilder, EntityId, EntityKey, Mass, Material, PhysicsError,
    PhysicsWorld, Shape, ShapeKind, Velocity, WorldParams,
};
