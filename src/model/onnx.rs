//! ONNX image classifier backed by `tract`.
//!
//! The exported graph takes a `[1, S, S, 3]` NHWC float tensor of raw pixel
//! values. Gradient access is opt-in at export time: when the graph also
//! exposes the target layer's activation and its gradient as named outputs,
//! a second plan returning the head, the activation and the gradients is
//! compiled next to the plain forward plan.

use super::{Classifier, LayerGradient, select_target};
use crate::{Error, Result, config::ModelConfig};
use ndarray::Array4;
use std::path::Path;
use tract_onnx::prelude::*;
use tracing::{debug, info, warn};

type Plan = TypedRunnableModel<TypedModel>;

struct GradientPlan {
    layer: String,
    plan: Plan,
    /// Output count of the model head; activation and gradients follow it.
    head_outputs: usize,
    classes: usize,
}

impl GradientPlan {
    fn activation_index(&self) -> usize {
        self.head_outputs
    }

    fn gradient_index(&self, target: usize) -> usize {
        self.head_outputs + 1 + target
    }
}

pub struct OnnxClassifier {
    forward_plan: Plan,
    gradient_plan: Option<GradientPlan>,
    image_size: usize,
}

impl OnnxClassifier {
    pub fn load(config: &ModelConfig) -> Result<Self> {
        let path = Path::new(&config.classifier_path);
        let load_err =
            |e: TractError| Error::model_load(path.display().to_string(), format!("{e:#}"));

        let model = tract_onnx::onnx().model_for_path(path).map_err(load_err)?;
        let classifier = Self::from_model(model, config).map_err(load_err)?;
        info!("Loaded classifier from {}", path.display());

        Ok(classifier)
    }

    /// Compile an already parsed graph for the configured input size.
    pub fn from_model(model: InferenceModel, config: &ModelConfig) -> TractResult<Self> {
        let image_size = config.image_size as usize;
        let model = model.with_input_fact(
            0,
            InferenceFact::dt_shape(f32::datum_type(), tvec!(1, image_size, image_size, 3)),
        )?;
        let head = Self::output_names(&model)?;
        let forward_plan = model.clone().into_optimized()?.into_runnable()?;

        let gradient_plan = match Self::build_gradient_plan(&model, &head, config) {
            Ok(plan) => {
                info!(
                    "Gradient outputs found for layer '{}' ({} classes)",
                    config.target_layer, plan.classes
                );
                Some(plan)
            }
            Err(e) => {
                warn!(
                    "Classifier exposes no gradient for layer '{}', saliency disabled: {:#}",
                    config.target_layer, e
                );
                None
            }
        };

        info!(
            "Compiled classifier (input {}x{}x3, outputs {:?})",
            image_size, image_size, head
        );

        Ok(Self {
            forward_plan,
            gradient_plan,
            image_size,
        })
    }

    pub fn supports_gradients(&self) -> bool {
        self.gradient_plan.is_some()
    }

    fn output_names(model: &InferenceModel) -> TractResult<Vec<String>> {
        Ok(model
            .output_outlets()?
            .iter()
            .map(|outlet| model.node(outlet.node).name.clone())
            .collect())
    }

    /// Output names carrying the gradient, one per class for multi-class heads.
    fn gradient_names(layer: &str, suffix: &str, classes: usize) -> Vec<String> {
        if classes == 1 {
            vec![format!("{layer}{suffix}")]
        } else {
            (0..classes).map(|c| format!("{layer}{suffix}_{c}")).collect()
        }
    }

    fn build_gradient_plan(
        model: &InferenceModel,
        head: &[String],
        config: &ModelConfig,
    ) -> TractResult<GradientPlan> {
        let classes = Self::head_classes(model)?;
        let mut names: Vec<String> = head.to_vec();
        names.push(config.target_layer.clone());
        names.extend(Self::gradient_names(
            &config.target_layer,
            &config.gradient_suffix,
            classes,
        ));

        let mut model = model.clone();
        model.set_output_names(&names)?;
        let plan = model.into_optimized()?.into_runnable()?;

        Ok(GradientPlan {
            layer: config.target_layer.clone(),
            plan,
            head_outputs: head.len(),
            classes,
        })
    }

    fn head_classes(model: &InferenceModel) -> TractResult<usize> {
        let typed = model.clone().into_typed()?;
        let fact = typed.output_fact(0)?;
        let classes = fact
            .shape
            .as_concrete()
            .map(|dims| dims.iter().product::<usize>())
            .unwrap_or(1);
        Ok(classes.max(1))
    }

    fn input_tensor(&self, input: &Array4<f32>) -> Result<Tensor> {
        let expected = [1, self.image_size, self.image_size, 3];
        if input.shape() != expected {
            return Err(Error::inference(format!(
                "classifier expects input {:?}, got {:?}",
                expected,
                input.shape()
            )));
        }
        let data: Vec<f32> = input.iter().copied().collect();
        Tensor::from_shape(&expected, &data).map_err(|e| Error::inference(format!("{e:#}")))
    }

    fn run(plan: &Plan, input: Tensor) -> Result<TVec<TValue>> {
        plan.run(tvec!(input.into()))
            .map_err(|e| Error::inference(format!("{e:#}")))
    }

    /// Gradient plan for `layer`, if the graph exports one.
    fn gradient_plan_for(&self, layer: &str) -> Option<&GradientPlan> {
        self.gradient_plan.as_ref().filter(|p| p.layer == layer)
    }
}

fn scores(outputs: &[TValue]) -> Result<Vec<f32>> {
    let scores = outputs
        .first()
        .ok_or_else(|| Error::inference("classifier produced no outputs"))?
        .as_slice::<f32>()
        .map_err(|e| Error::inference(format!("{e:#}")))?
        .to_vec();
    debug!("Classifier scores: {:?}", scores);
    Ok(scores)
}

fn capture(plan: &GradientPlan, outputs: &[TValue], target: usize) -> Result<LayerGradient> {
    let layer = plan.layer.as_str();
    let activation_idx = plan.activation_index();
    let gradient_idx = plan.gradient_index(target);
    let (Some(activation), Some(gradient)) =
        (outputs.get(activation_idx), outputs.get(gradient_idx))
    else {
        return Err(Error::saliency(
            layer,
            format!(
                "expected at least {} outputs, got {}",
                gradient_idx + 1,
                outputs.len()
            ),
        ));
    };

    Ok(LayerGradient {
        activation: nhwc(layer, "activation", activation)?,
        gradient: nhwc(layer, "gradient", gradient)?,
    })
}

fn nhwc(layer: &str, what: &str, tensor: &Tensor) -> Result<Array4<f32>> {
    let shape = tensor.shape();
    if shape.len() != 4 {
        return Err(Error::saliency(
            layer,
            format!("{what} has shape {shape:?}, expected 4 dimensions"),
        ));
    }
    let data = tensor
        .as_slice::<f32>()
        .map_err(|e| Error::saliency(layer, format!("{what}: {e:#}")))?
        .to_vec();
    Ok(Array4::from_shape_vec(
        (shape[0], shape[1], shape[2], shape[3]),
        data,
    )?)
}

impl Classifier for OnnxClassifier {
    fn forward(&self, input: &Array4<f32>) -> Result<Vec<f32>> {
        let outputs = Self::run(&self.forward_plan, self.input_tensor(input)?)?;
        scores(&outputs)
    }

    fn layer_gradient(
        &self,
        layer: &str,
        input: &Array4<f32>,
        target: usize,
    ) -> Result<Option<LayerGradient>> {
        let Some(plan) = self.gradient_plan_for(layer) else {
            return Ok(None);
        };
        if target >= plan.classes {
            return Ok(None);
        }

        let outputs = Self::run(&plan.plan, self.input_tensor(input)?)?;
        capture(plan, &outputs, target).map(Some)
    }

    /// Head scores and gradients come out of the same run of the gradient plan.
    fn forward_with_gradient(
        &self,
        layer: &str,
        input: &Array4<f32>,
    ) -> Result<(Vec<f32>, Option<LayerGradient>)> {
        let Some(plan) = self.gradient_plan_for(layer) else {
            return Ok((self.forward(input)?, None));
        };

        let outputs = Self::run(&plan.plan, self.input_tensor(input)?)?;
        let scores = scores(&outputs)?;
        let target = select_target(&scores)
            .ok_or_else(|| Error::inference("classifier produced an empty score vector"))?;
        if target >= plan.classes {
            return Ok((scores, None));
        }

        let capture = capture(plan, &outputs, target)?;
        Ok((scores, Some(capture)))
    }
}
