//! Cut a circuit, run every instance on simulated devices, and check the
//! recombined distribution against the known answer.

use qvirt_adapter_sim::SimulatedProvider;
use qvirt_cut::{CircuitCutter, CutConstraints, InstanceOutcomes, WireCutter};
use qvirt_hal::{DeviceDescriptor, DeviceProvider};
use qvirt_ir::{Circuit, QubitId};

async fn run_cut(body: &Circuit, constraints: &CutConstraints, shots: u32) -> qvirt_cut::Distribution {
    let provider = SimulatedProvider::new(vec![
        DeviceDescriptor::new("sim", 3).simulator().with_limits(100_000, 100),
    ])
    .with_seed(11);

    let solution = WireCutter.find_cuts(body, constraints).unwrap().unwrap();
    let instances = WireCutter.build_instances(&solution, shots).unwrap();

    let mut outcomes = InstanceOutcomes::default();
    for instance in instances {
        let handle = provider
            .submit("sim", std::slice::from_ref(&instance.circuit), instance.shots)
            .await
            .unwrap();
        let result = provider.wait(&handle).await.unwrap();
        outcomes.insert(instance.key, result.experiments[0].probabilities());
    }

    WireCutter.reconstruct(&solution, &outcomes).unwrap()
}

#[tokio::test]
async fn test_ghz_six_from_three_qubit_pieces() {
    let body = Circuit::ghz(6).unwrap().remove_measurements();
    let dist = run_cut(&body, &CutConstraints::new(3, 3, 2), 20_000).await;

    let p0 = dist.get("000000").copied().unwrap_or(0.0);
    let p1 = dist.get("111111").copied().unwrap_or(0.0);
    assert!((p0 - 0.5).abs() < 0.05, "p(000000) = {p0}");
    assert!((p1 - 0.5).abs() < 0.05, "p(111111) = {p1}");
    assert!(p0 + p1 > 0.9);
}

#[tokio::test]
async fn test_rotated_chain() {
    // Ry(π/3) on q0 then a CX chain: outcomes 0000 and 1111 with
    // probabilities cos²(π/6) and sin²(π/6).
    let mut body = Circuit::with_size("ry_chain", 4, 0);
    body.ry(std::f64::consts::PI / 3.0, QubitId(0)).unwrap();
    for q in 0..3 {
        body.cx(QubitId(q), QubitId(q + 1)).unwrap();
    }
    let dist = run_cut(&body, &CutConstraints::new(3, 2, 1), 20_000).await;

    let p0 = dist.get("0000").copied().unwrap_or(0.0);
    let p1 = dist.get("1111").copied().unwrap_or(0.0);
    assert!((p0 - 0.75).abs() < 0.05, "p(0000) = {p0}");
    assert!((p1 - 0.25).abs() < 0.05, "p(1111) = {p1}");
}
