mod error;
pub use error::*;

mod dynamical_systems;
pub use dynamical_systems::*;

mod integrator;
pub use integrator::*;

mod orbit;
pub use orbit::*;

mod variational;
pub use variational::*;

mod lyapunov;
pub use lyapunov::*;

mod periodic;
pub use periodic::*;

mod refiner;
pub use refiner::*;

mod density;
pub use density::*;

mod transitivity;
pub use transitivity::*;

mod entropy;
pub use entropy::*;

mod li_yorke;
pub use li_yorke::*;

mod user_defined;
pub use user_defined::*;

mod classic_systems;
pub use classic_systems::*;

mod bifurcation;
pub use bifurcation::*;
