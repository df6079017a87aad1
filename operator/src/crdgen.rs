use jupyter_operator::crd::{
    JupyterGateway, JupyterKernel, JupyterKernelSpec, JupyterKernelTemplate, JupyterNotebook,
};
use kube::CustomResourceExt;

fn main() {
    let crds = [
        JupyterGateway::crd(),
        JupyterKernel::crd(),
        JupyterKernelSpec::crd(),
        JupyterKernelTemplate::crd(),
        JupyterNotebook::crd(),
    ];
    for crd in crds {
        println!("---");
        println!("{}", serde_yaml::to_string(&crd).unwrap());
    }
}
