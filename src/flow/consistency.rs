use nalgebra::Point2;

use crate::error::PipelineError;
use crate::geometry::round_in_bounds;
use crate::grid::FlowField;

/// Keep the forward flow `a -> b` only where it round-trips through `b -> a`.
///
/// A pixel `p` of `a` is followed to the nearest pixel `q` of `b`, then back
/// along the backward flow. The forward vector survives when the landing
/// point is closer than `threshold` (squared pixels) to `p`. Unknown vectors,
/// out-of-image targets and failed round trips become unknown.
pub fn filter_flow(
    forward: &FlowField,
    backward: &FlowField,
    threshold: f64,
) -> Result<FlowField, PipelineError> {
    forward.ensure_same_size(backward)?;
    let (w, h) = (forward.width(), forward.height());

    Ok(FlowField::par_from_fn(w, h, |u0, v0| {
        let f = forward.get(u0, v0)?;
        let target = Point2::new(u0 as f64 + f.x as f64, v0 as f64 + f.y as f64);
        let (u1, v1) = round_in_bounds(&target, w, h)?;
        let b = backward.get(u1, v1)?;
        let du = u1 as f64 + b.x as f64 - u0 as f64;
        let dv = v1 as f64 + b.y as f64 - v0 as f64;
        (du * du + dv * dv < threshold).then_some(f)
    }))
}
