//! Evaluation charts using Plotters

use std::path::Path;

use plotters::prelude::*;
use tracing::info;

use crate::error::ChurnError;
use crate::model::CHURN;
use crate::train::ModelEvaluation;

/// One color per plotted score.
const METRIC_COLORS: [RGBColor; 3] = [BLUE, RED, GREEN];
const METRIC_NAMES: [&str; 3] = ["Precision", "Recall", "F1"];

/// Width of a model's bar group on the x axis.
const GROUP_WIDTH: f64 = 0.8;

fn plot_err<E: std::fmt::Display>(e: E) -> ChurnError {
    ChurnError::Plot(e.to_string())
}

/// Churn-class precision, recall and F1 of one model.
pub fn churn_scores(evaluation: &ModelEvaluation) -> [f64; 3] {
    match evaluation.report.class(CHURN) {
        Some(m) => [m.precision, m.recall, m.f1],
        None => [0.0; 3],
    }
}

/// Horizontal extent of the bar for `metric` within the group of `model`.
pub fn bar_span(model: usize, metric: usize) -> (f64, f64) {
    let width = GROUP_WIDTH / METRIC_NAMES.len() as f64;
    let left = model as f64 - GROUP_WIDTH / 2.0 + metric as f64 * width;
    (left, left + width)
}

/// Grouped bar chart of churn-class scores, one group per model.
pub fn create_evaluation_chart(
    evaluations: &[ModelEvaluation],
    output_path: &Path,
) -> crate::Result<()> {
    if evaluations.is_empty() {
        return Err(ChurnError::Plot("no model evaluations to plot".to_string()));
    }

    let n_models = evaluations.len() as f64;
    let root = BitMapBackend::new(output_path, (800, 500)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Churn Class Scores by Model", ("sans-serif", 28))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(-0.5f64..(n_models - 0.5), 0f64..1.05f64)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(evaluations.len())
        .x_label_formatter(&|x: &f64| {
            let index = x.round();
            if index >= 0.0 && (index as usize) < evaluations.len() {
                evaluations[index as usize].kind.display_name().to_string()
            } else {
                String::new()
            }
        })
        .y_desc("Score")
        .axis_desc_style(("sans-serif", 15))
        .draw()
        .map_err(plot_err)?;

    for (metric, name) in METRIC_NAMES.iter().enumerate() {
        let color = METRIC_COLORS[metric];
        let bars = evaluations.iter().enumerate().map(|(model, evaluation)| {
            let (left, right) = bar_span(model, metric);
            let score = churn_scores(evaluation)[metric];
            Rectangle::new([(left, 0.0), (right, score)], color.filled())
        });
        chart
            .draw_series(bars)
            .map_err(plot_err)?
            .label(*name)
            .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], color.filled()));
    }

    chart
        .configure_series_labels()
        .border_style(BLACK)
        .background_style(WHITE.mix(0.8))
        .draw()
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    info!(path = %output_path.display(), models = evaluations.len(), "Saved evaluation chart");
    Ok(())
}
