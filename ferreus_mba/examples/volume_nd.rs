use ferreus_mba::{
    generate_random_points, InitialApproximation, MBATestFunctions, MbaParams, MultilevelBSpline,
};
use ndarray::Array4;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Scattered samples of a 3D Franke-like function plus a linear drift
    let num_points = 5000usize;
    let points = generate_random_points(num_points, 3, Some(7));
    let mut point_values = MBATestFunctions::franke_3d(&points);
    for i in 0..num_points {
        point_values[(i, 0)] += 2.0 * points[(i, 2)];
    }

    let params = MbaParams::builder()
        .max_levels(5)
        .initial_approximation(InitialApproximation::Linear)
        .build();

    let model = MultilevelBSpline::builder(
        vec![0.0; 3],
        vec![1.0; 3],
        vec![2, 2, 2],
        points,
        point_values,
    )
    .params(params)
    .build()?;

    println!("{model}");

    // Evaluate on a 32^3 voxel grid stored as an ndarray with coordinates on the last axis
    let n = 32;
    let step = 1.0 / (n - 1) as f64;
    let voxels = Array4::from_shape_fn((n, n, n, 3), |(i, j, k, d)| {
        step * [i, j, k][d] as f64
    });
    let values = model.evaluate_nd(voxels.view().into_dyn())?;
    println!("evaluated {:?} voxels", values.shape());

    // A single lattice at the finest resolution evaluates faster
    let compact = model.compact()?;
    println!("{compact}");

    let path = std::env::temp_dir().join("volume_nd_model.json");
    compact.save_model(&path)?;
    let reloaded = MultilevelBSpline::load_model(&path, None)?;
    println!(
        "value at the centre after reload: {:.6}",
        reloaded.evaluate_point(&[0.5, 0.5, 0.5])?
    );

    Ok(())
}
