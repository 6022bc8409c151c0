use ferreus_mba::{
    create_evaluation_grid, generate_random_points,
    progress::{closure_sink, ProgressMsg},
    MBATestFunctions, MbaParams, MultilevelBSpline,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Scattered source points in [0, 1]^2
    let dim = 2usize;
    let num_points = 2000usize;
    let points = generate_random_points(num_points, dim, Some(42));

    // Define some values at the source points using Franke's function
    let point_values = MBATestFunctions::franke_2d(&points);

    // Print a line for every fitted level
    let (sink, listener) = closure_sink(64, |msg| match msg {
        ProgressMsg::LevelFitted {
            level,
            grid,
            fill_ratio,
            rms,
            ..
        } => println!("level {level}: grid {grid:?}, fill {fill_ratio:.2}, rms {rms:.3e}"),
        ProgressMsg::Message { message } => println!("{message}"),
        _ => {}
    });

    let params = MbaParams::builder().max_levels(8).tol(1e-6).build();

    // Build the hierarchy starting from a 4 x 4 lattice
    let model = MultilevelBSpline::builder(
        vec![0.0, 0.0],
        vec![1.0, 1.0],
        vec![4, 4],
        points,
        point_values,
    )
    .params(params)
    .progress_callback(sink)
    .build()?;

    println!("{model}");

    // Build a 2D grid of target points in [0, 1]^2 and evaluate the model there
    let n = 100;
    let target_points = create_evaluation_grid(&[(0.0, 1.0), (0.0, 1.0)], &[n, n]);
    let fitted = model.evaluate(&target_points)?;
    let exact = MBATestFunctions::franke_2d(&target_points);

    let max_error = (0..target_points.nrows())
        .map(|i| (fitted[(i, 0)] - exact[(i, 0)]).abs())
        .fold(0.0, f64::max);
    println!("max error on a {n} x {n} grid: {max_error:.3e}");

    drop(model);
    let _ = listener.join();

    Ok(())
}
